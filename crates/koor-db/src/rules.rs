//! `validation_rules` row access (spec.md §4.8). Dispatch and gating logic
//! live in `koor-lint`; this module is pure CRUD plus the `_global` merge
//! query `list_applicable` needs.

use koor_schemas::{
    Error, LintRule, MatchType, Result, RuleSource, RuleStatus, Severity, GLOBAL_PROJECT,
};
use sqlx::{Row, SqlitePool};

fn row_to_rule(row: sqlx::sqlite::SqliteRow) -> Result<LintRule> {
    let applies_to_text: String = row.try_get("applies_to")?;
    let severity_text: String = row.try_get("severity")?;
    let match_type_text: String = row.try_get("match_type")?;
    let source_text: String = row.try_get("source")?;
    let status_text: String = row.try_get("status")?;

    Ok(LintRule {
        project: row.try_get("project")?,
        rule_id: row.try_get("rule_id")?,
        severity: parse_severity(&severity_text)?,
        match_type: parse_match_type(&match_type_text)?,
        pattern: row.try_get("pattern")?,
        message: row.try_get("message")?,
        applies_to: serde_json::from_str(&applies_to_text)?,
        stack: row.try_get("stack")?,
        source: parse_source(&source_text)?,
        status: parse_status(&status_text)?,
        proposed_by: row.try_get("proposed_by")?,
        context: row.try_get("context")?,
    })
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}
fn parse_severity(s: &str) -> Result<Severity> {
    match s {
        "error" => Ok(Severity::Error),
        "warning" => Ok(Severity::Warning),
        "info" => Ok(Severity::Info),
        other => Err(Error::Internal(format!("bad severity {other}"))),
    }
}

fn match_type_str(m: MatchType) -> &'static str {
    match m {
        MatchType::Regex => "regex",
        MatchType::Missing => "missing",
        MatchType::Custom => "custom",
    }
}
fn parse_match_type(s: &str) -> Result<MatchType> {
    match s {
        "regex" => Ok(MatchType::Regex),
        "missing" => Ok(MatchType::Missing),
        "custom" => Ok(MatchType::Custom),
        other => Err(Error::Internal(format!("bad match_type {other}"))),
    }
}

fn source_str(s: RuleSource) -> &'static str {
    match s {
        RuleSource::Local => "local",
        RuleSource::Learned => "learned",
        RuleSource::External => "external",
    }
}
fn parse_source(s: &str) -> Result<RuleSource> {
    match s {
        "local" => Ok(RuleSource::Local),
        "learned" => Ok(RuleSource::Learned),
        "external" => Ok(RuleSource::External),
        other => Err(Error::Internal(format!("bad rule source {other}"))),
    }
}

fn status_str(s: RuleStatus) -> &'static str {
    match s {
        RuleStatus::Proposed => "proposed",
        RuleStatus::Accepted => "accepted",
        RuleStatus::Rejected => "rejected",
    }
}
fn parse_status(s: &str) -> Result<RuleStatus> {
    match s {
        "proposed" => Ok(RuleStatus::Proposed),
        "accepted" => Ok(RuleStatus::Accepted),
        "rejected" => Ok(RuleStatus::Rejected),
        other => Err(Error::Internal(format!("bad rule status {other}"))),
    }
}

pub async fn put(pool: &SqlitePool, rule: &LintRule) -> Result<()> {
    let applies_to_text = serde_json::to_string(&rule.applies_to)?;
    sqlx::query(
        r#"
        insert into validation_rules
            (project, rule_id, severity, match_type, pattern, message, applies_to, stack,
             source, status, proposed_by, context)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        on conflict(project, rule_id) do update set
            severity = excluded.severity,
            match_type = excluded.match_type,
            pattern = excluded.pattern,
            message = excluded.message,
            applies_to = excluded.applies_to,
            stack = excluded.stack,
            source = excluded.source,
            status = excluded.status,
            proposed_by = excluded.proposed_by,
            context = excluded.context
        "#,
    )
    .bind(&rule.project)
    .bind(&rule.rule_id)
    .bind(severity_str(rule.severity))
    .bind(match_type_str(rule.match_type))
    .bind(&rule.pattern)
    .bind(&rule.message)
    .bind(applies_to_text)
    .bind(&rule.stack)
    .bind(source_str(rule.source))
    .bind(status_str(rule.status))
    .bind(&rule.proposed_by)
    .bind(&rule.context)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool, project: &str) -> Result<Vec<LintRule>> {
    let rows = sqlx::query("select * from validation_rules where project = ?1 order by rule_id asc")
        .bind(project)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_rule).collect()
}

/// Every rule across every project, for `ExportRules(sources?)` (spec.md
/// §4.8), which is keyed on `source` rather than scoped to one project.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<LintRule>> {
    let rows = sqlx::query("select * from validation_rules order by project asc, rule_id asc")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_rule).collect()
}

/// Deletes every rule for `project`, then inserts `rules`, as one
/// transaction. Backs `PutRules(project, [rules])` (spec.md §4.8).
pub async fn replace_all(pool: &SqlitePool, project: &str, rules: &[LintRule]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("delete from validation_rules where project = ?1")
        .bind(project)
        .execute(&mut *tx)
        .await?;

    for rule in rules {
        let applies_to_text = serde_json::to_string(&rule.applies_to)?;
        sqlx::query(
            r#"
            insert into validation_rules
                (project, rule_id, severity, match_type, pattern, message, applies_to, stack,
                 source, status, proposed_by, context)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(project)
        .bind(&rule.rule_id)
        .bind(severity_str(rule.severity))
        .bind(match_type_str(rule.match_type))
        .bind(&rule.pattern)
        .bind(&rule.message)
        .bind(applies_to_text)
        .bind(&rule.stack)
        .bind(source_str(rule.source))
        .bind(status_str(rule.status))
        .bind(&rule.proposed_by)
        .bind(&rule.context)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Rules a lint request against `project` must consider: the project's own
/// rules plus everything registered under `_global` (spec.md §4.8).
pub async fn list_applicable(pool: &SqlitePool, project: &str) -> Result<Vec<LintRule>> {
    let rows = sqlx::query(
        "select * from validation_rules where project = ?1 or project = ?2 order by rule_id asc",
    )
    .bind(project)
    .bind(GLOBAL_PROJECT)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(row_to_rule).collect()
}

pub async fn set_status(
    pool: &SqlitePool,
    project: &str,
    rule_id: &str,
    status: RuleStatus,
) -> Result<()> {
    let res = sqlx::query(
        "update validation_rules set status = ?3 where project = ?1 and rule_id = ?2",
    )
    .bind(project)
    .bind(rule_id)
    .bind(status_str(status))
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("rule {project}/{rule_id}")));
    }
    Ok(())
}

pub async fn delete(pool: &SqlitePool, project: &str, rule_id: &str) -> Result<()> {
    let res = sqlx::query("delete from validation_rules where project = ?1 and rule_id = ?2")
        .bind(project)
        .bind(rule_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("rule {project}/{rule_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;
    use koor_schemas::default_applies_to;

    fn sample_rule(project: &str, id: &str) -> LintRule {
        LintRule {
            project: project.to_string(),
            rule_id: id.to_string(),
            severity: Severity::Warning,
            match_type: MatchType::Regex,
            pattern: "TODO".to_string(),
            message: "leftover TODO".to_string(),
            applies_to: default_applies_to(),
            stack: String::new(),
            source: RuleSource::Local,
            status: RuleStatus::Accepted,
            proposed_by: String::new(),
            context: String::new(),
        }
    }

    #[tokio::test]
    async fn global_rules_apply_to_every_project() {
        let pool = memory_pool().await;
        put(&pool, &sample_rule("proj-a", "r1")).await.unwrap();
        put(&pool, &sample_rule(GLOBAL_PROJECT, "r2")).await.unwrap();

        let applicable = list_applicable(&pool, "proj-a").await.unwrap();
        assert_eq!(applicable.len(), 2);

        let other = list_applicable(&pool, "proj-b").await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].rule_id, "r2");
    }

    #[tokio::test]
    async fn set_status_transitions_proposed_rule() {
        let pool = memory_pool().await;
        let mut rule = sample_rule("proj", "r1");
        rule.status = RuleStatus::Proposed;
        put(&pool, &rule).await.unwrap();

        set_status(&pool, "proj", "r1", RuleStatus::Accepted).await.unwrap();
        let listed = list(&pool, "proj").await.unwrap();
        assert_eq!(listed[0].status, RuleStatus::Accepted);
    }

    #[tokio::test]
    async fn replace_all_clears_prior_rules_for_project() {
        let pool = memory_pool().await;
        put(&pool, &sample_rule("proj", "old")).await.unwrap();

        replace_all(&pool, "proj", &[sample_rule("proj", "new")]).await.unwrap();

        let listed = list(&pool, "proj").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rule_id, "new");
    }

    #[tokio::test]
    async fn list_all_spans_every_project() {
        let pool = memory_pool().await;
        put(&pool, &sample_rule("proj-a", "r1")).await.unwrap();
        put(&pool, &sample_rule("proj-b", "r2")).await.unwrap();

        let all = list_all(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
