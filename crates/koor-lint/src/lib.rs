//! Lint rule engine (spec.md §4.8): propose/accept/reject lifecycle for
//! per-project rules, dispatched against a file by regex/missing/custom
//! matchers, gated by stack and a glob over `applies_to`.

use glob::Pattern;
use koor_schemas::{
    LintRequest, LintRule, MatchType, Result, RuleSource, RuleStatus, Severity, Violation,
};
use sqlx::SqlitePool;

pub async fn list_rules(pool: &SqlitePool, project: &str) -> Result<Vec<LintRule>> {
    koor_db::rules::list(pool, project).await
}

pub async fn put_rule(pool: &SqlitePool, rule: &LintRule) -> Result<()> {
    koor_db::rules::put(pool, rule).await
}

pub async fn propose_rule(pool: &SqlitePool, mut rule: LintRule) -> Result<()> {
    rule.status = RuleStatus::Proposed;
    koor_db::rules::put(pool, &rule).await
}

pub async fn accept_rule(pool: &SqlitePool, project: &str, rule_id: &str) -> Result<()> {
    koor_db::rules::set_status(pool, project, rule_id, RuleStatus::Accepted).await
}

pub async fn reject_rule(pool: &SqlitePool, project: &str, rule_id: &str) -> Result<()> {
    koor_db::rules::set_status(pool, project, rule_id, RuleStatus::Rejected).await
}

/// `PutRules(project, [rules])` (spec.md §4.8): replaces the entire rule set
/// scoped to `project`, forcing every rule's `project` field to match it.
/// Field defaults (`severity=error`, `match_type=regex`, `applies_to=["*"]`,
/// `source=local`, `status=accepted`) come from `LintRule`'s `Deserialize`
/// impl when a field is omitted from the request body.
pub async fn put_rules(pool: &SqlitePool, project: &str, rules: &[LintRule]) -> Result<()> {
    let scoped: Vec<LintRule> = rules
        .iter()
        .cloned()
        .map(|mut rule| {
            rule.project = project.to_string();
            rule
        })
        .collect();
    koor_db::rules::replace_all(pool, project, &scoped).await
}

/// `ImportRules([rules])` (spec.md §4.8): bulk upsert, skipping any rule
/// with an empty `project` and forcing `status=accepted` on the rest.
pub async fn import_rules(pool: &SqlitePool, rules: &[LintRule]) -> Result<()> {
    for rule in rules {
        if rule.project.is_empty() {
            continue;
        }
        let mut rule = rule.clone();
        rule.status = RuleStatus::Accepted;
        koor_db::rules::put(pool, &rule).await?;
    }
    Ok(())
}

/// `ExportRules(sources?)` (spec.md §4.8): every `accepted` rule whose
/// `source` is in `sources` (default `{local, learned}`), across every
/// project — this is keyed on source, not scoped to one project.
pub async fn export_rules(pool: &SqlitePool, sources: Option<&[RuleSource]>) -> Result<Vec<LintRule>> {
    const DEFAULT_SOURCES: [RuleSource; 2] = [RuleSource::Local, RuleSource::Learned];
    let sources = sources.unwrap_or(&DEFAULT_SOURCES);

    let rules = koor_db::rules::list_all(pool).await?;
    Ok(rules
        .into_iter()
        .filter(|r| r.status == RuleStatus::Accepted && sources.contains(&r.source))
        .collect())
}

/// `"no-console-log"` is the one built-in `custom` shortcut; anything else
/// falls back to being dispatched as `regex` (spec.md §4.8 step 3).
const NO_CONSOLE_LOG_PATTERN: &str = r"console\.log\(";

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn applies_to_file(rule: &LintRule, filename: &str) -> bool {
    if filename.is_empty() {
        return true;
    }
    let base = basename(filename);
    rule.applies_to.iter().any(|glob_str| {
        Pattern::new(glob_str)
            .map(|p| p.matches(filename) || p.matches(base))
            .unwrap_or(false)
    })
}

fn applies_to_stack(rule: &LintRule, stack: &str) -> bool {
    !(!rule.stack.is_empty() && !stack.is_empty() && rule.stack != stack)
}

fn effective_pattern(rule: &LintRule) -> &str {
    if rule.match_type == MatchType::Custom && rule.pattern == "no-console-log" {
        NO_CONSOLE_LOG_PATTERN
    } else {
        &rule.pattern
    }
}

fn bad_pattern_violation(rule: &LintRule, err: &regex::Error) -> Violation {
    Violation {
        rule_id: rule.rule_id.clone(),
        severity: Severity::Error,
        message: format!("bad pattern {:?}: {err}", rule.pattern),
        line: None,
        matched: None,
        path: None,
    }
}

/// Dispatches every accepted rule applicable to `project` against
/// `request`, returning every violation found, in rule-iteration order
/// (spec.md §4.8: "no de-duplication").
pub async fn validate(
    pool: &SqlitePool,
    project: &str,
    request: &LintRequest,
) -> Result<Vec<Violation>> {
    let rules = koor_db::rules::list_applicable(pool, project).await?;
    let mut violations = Vec::new();

    for rule in rules {
        if rule.status != RuleStatus::Accepted {
            continue;
        }
        if !applies_to_stack(&rule, &request.stack) {
            continue;
        }
        if !applies_to_file(&rule, &request.filename) {
            continue;
        }

        let pattern = effective_pattern(&rule);
        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                violations.push(bad_pattern_violation(&rule, &e));
                continue;
            }
        };

        match rule.match_type {
            MatchType::Regex | MatchType::Custom => {
                for (i, line) in request.content.split('\n').enumerate() {
                    if let Some(m) = re.find(line) {
                        violations.push(Violation {
                            rule_id: rule.rule_id.clone(),
                            severity: rule.severity,
                            message: rule.message.clone(),
                            line: Some((i + 1) as u32),
                            matched: Some(m.as_str().to_string()),
                            path: Some(request.filename.clone()),
                        });
                    }
                }
            }
            MatchType::Missing => {
                if !re.is_match(&request.content) {
                    violations.push(Violation {
                        rule_id: rule.rule_id.clone(),
                        severity: rule.severity,
                        message: rule.message.clone(),
                        line: None,
                        matched: None,
                        path: Some(request.filename.clone()),
                    });
                }
            }
        }
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use koor_schemas::{default_applies_to, RuleSource, GLOBAL_PROJECT};

    async fn memory_pool() -> SqlitePool {
        let pool = koor_db::connect("sqlite::memory:").await.unwrap();
        koor_db::migrate(&pool).await.unwrap();
        pool
    }

    fn rule(project: &str, id: &str, match_type: MatchType, pattern: &str) -> LintRule {
        LintRule {
            project: project.to_string(),
            rule_id: id.to_string(),
            severity: Severity::Warning,
            match_type,
            pattern: pattern.to_string(),
            message: "violation".to_string(),
            applies_to: default_applies_to(),
            stack: String::new(),
            source: RuleSource::Local,
            status: RuleStatus::Accepted,
            proposed_by: String::new(),
            context: String::new(),
        }
    }

    #[tokio::test]
    async fn regex_rule_flags_every_matching_line() {
        let pool = memory_pool().await;
        put_rule(&pool, &rule("proj", "no-todo", MatchType::Regex, "TODO")).await.unwrap();

        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "main.rs".to_string(),
                content: "// TODO: one\nfine\n// TODO: two".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();

        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].line, Some(1));
        assert_eq!(violations[1].line, Some(3));
    }

    #[tokio::test]
    async fn missing_rule_flags_absence() {
        let pool = memory_pool().await;
        put_rule(&pool, &rule("proj", "has-license", MatchType::Missing, "SPDX-License-Identifier"))
            .await
            .unwrap();

        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "main.rs".to_string(),
                content: "fn main() {}".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "has-license");
    }

    #[tokio::test]
    async fn custom_no_console_log_shortcut() {
        let pool = memory_pool().await;
        put_rule(&pool, &rule("proj", "no-console", MatchType::Custom, "no-console-log"))
            .await
            .unwrap();

        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "app.js".to_string(),
                content: "console.log(\"hi\")".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn bad_pattern_yields_error_violation_instead_of_failing() {
        let pool = memory_pool().await;
        put_rule(&pool, &rule("proj", "broken", MatchType::Regex, "(unterminated"))
            .await
            .unwrap();

        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "main.rs".to_string(),
                content: "anything".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn proposed_rule_does_not_fire_until_accepted() {
        let pool = memory_pool().await;
        let r = rule("proj", "r1", MatchType::Regex, "TODO");
        propose_rule(&pool, r).await.unwrap();

        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "main.rs".to_string(),
                content: "TODO".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert!(violations.is_empty());

        accept_rule(&pool, "proj", "r1").await.unwrap();
        let violations = validate(
            &pool,
            "proj",
            &LintRequest {
                filename: "main.rs".to_string(),
                content: "TODO".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn global_rule_applies_and_glob_gates_by_basename() {
        let pool = memory_pool().await;
        let mut r = rule(GLOBAL_PROJECT, "rust-only", MatchType::Regex, "unsafe");
        r.applies_to = vec!["*.rs".to_string()];
        put_rule(&pool, &r).await.unwrap();

        let hit = validate(
            &pool,
            "any-project",
            &LintRequest {
                filename: "src/lib.rs".to_string(),
                content: "unsafe {}".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = validate(
            &pool,
            "any-project",
            &LintRequest {
                filename: "src/lib.py".to_string(),
                content: "unsafe".to_string(),
                stack: String::new(),
            },
        )
        .await
        .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn stack_gate_only_drops_when_both_sides_are_set_and_differ() {
        let pool = memory_pool().await;
        let mut r = rule("proj", "rust-rule", MatchType::Regex, "TODO");
        r.stack = "rust".to_string();
        put_rule(&pool, &r).await.unwrap();

        let req = LintRequest {
            filename: String::new(),
            content: "TODO".to_string(),
            stack: String::new(),
        };
        assert_eq!(validate(&pool, "proj", &req).await.unwrap().len(), 1);

        let req_other_stack = LintRequest {
            filename: String::new(),
            content: "TODO".to_string(),
            stack: "python".to_string(),
        };
        assert!(validate(&pool, "proj", &req_other_stack).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_rules_replaces_prior_set_and_forces_path_project() {
        let pool = memory_pool().await;
        put_rule(&pool, &rule("proj", "stale", MatchType::Regex, "x")).await.unwrap();

        let mut incoming = rule("wrong-project", "fresh", MatchType::Regex, "y");
        incoming.project = "wrong-project".to_string();
        put_rules(&pool, "proj", &[incoming]).await.unwrap();

        let listed = list_rules(&pool, "proj").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rule_id, "fresh");
        assert_eq!(listed[0].project, "proj");
    }

    #[tokio::test]
    async fn import_rules_skips_empty_project_and_forces_accepted() {
        let pool = memory_pool().await;
        let mut proposed = rule("proj", "r1", MatchType::Regex, "TODO");
        proposed.status = RuleStatus::Proposed;
        let mut no_project = rule("", "r2", MatchType::Regex, "TODO");
        no_project.project = String::new();

        import_rules(&pool, &[proposed, no_project]).await.unwrap();

        let listed = list_rules(&pool, "proj").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RuleStatus::Accepted);
    }

    #[tokio::test]
    async fn export_rules_defaults_to_local_and_learned_accepted_only() {
        let pool = memory_pool().await;
        let mut local_accepted = rule("proj", "local-ok", MatchType::Regex, "x");
        local_accepted.source = RuleSource::Local;
        let mut learned_proposed = rule("proj", "learned-pending", MatchType::Regex, "x");
        learned_proposed.source = RuleSource::Learned;
        learned_proposed.status = RuleStatus::Proposed;
        let mut external_accepted = rule("proj", "external-ok", MatchType::Regex, "x");
        external_accepted.source = RuleSource::External;

        put_rule(&pool, &local_accepted).await.unwrap();
        put_rule(&pool, &learned_proposed).await.unwrap();
        put_rule(&pool, &external_accepted).await.unwrap();

        let exported = export_rules(&pool, None).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].rule_id, "local-ok");

        let with_external = export_rules(&pool, Some(&[RuleSource::External])).await.unwrap();
        assert_eq!(with_external.len(), 1);
        assert_eq!(with_external[0].rule_id, "external-ok");
    }
}
