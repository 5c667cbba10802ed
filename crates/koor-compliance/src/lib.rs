//! Compliance scheduler (spec.md §4.10): periodically re-checks every
//! active instance's contracts for gross structural problems and records a
//! pass/fail run, publishing `compliance.violation` on failure.

use koor_bus::Bus;
use koor_schemas::{ComplianceRun, InstanceStatus, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Project inference is `project := workspace`, verbatim (spec.md §9
/// records this as an intentional open ambiguity, not a bug to silently
/// fix: a future rewrite should make the project/workspace mapping
/// explicit instead of collapsing them to the same string).
fn infer_project(workspace: &str) -> Option<&str> {
    if workspace.is_empty() {
        None
    } else {
        Some(workspace)
    }
}

fn structural_violations(contract: &koor_schemas::Contract) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    if contract.endpoints.is_empty() {
        out.push(serde_json::json!({"path": "endpoints", "message": "contract declares no endpoints"}));
        return out;
    }
    for (name, endpoint) in &contract.endpoints {
        if endpoint.request.is_empty()
            && endpoint.response.is_empty()
            && endpoint.response_array.is_empty()
            && endpoint.query.is_empty()
        {
            out.push(serde_json::json!({
                "path": format!("endpoints.{name}"),
                "message": "endpoint declares no request/response/response_array/query fields",
            }));
        }
    }
    out
}

/// One pass over every active instance (spec.md §4.10 `RunAll`): infers a
/// project per instance, loads its specs, parses the contract-shaped ones,
/// runs the structural checks, and persists + publishes the result.
pub async fn run_all(pool: &SqlitePool, bus: &Bus) -> Result<Vec<ComplianceRun>> {
    let mut runs = Vec::new();
    let active = koor_db::instances::list_by_status(pool, InstanceStatus::Active).await?;

    for instance in active {
        let Some(project) = infer_project(&instance.workspace) else {
            continue;
        };

        let specs = koor_db::specs::list(pool, project).await?;
        for summary in specs {
            let spec = koor_db::specs::get(pool, project, &summary.name).await?;
            let Ok(contract) = serde_json::from_slice::<serde_json::Value>(&spec.data) else {
                continue;
            };
            if contract.get("kind").and_then(|v| v.as_str()) != Some("contract") {
                continue;
            }
            let Ok(contract) = serde_json::from_value::<koor_schemas::Contract>(contract) else {
                continue;
            };

            let violations = structural_violations(&contract);
            let pass = violations.is_empty();
            let violations_json = serde_json::Value::Array(violations);

            let run = koor_db::compliance::insert(
                pool,
                instance.id,
                project,
                &summary.name,
                pass,
                &violations_json,
            )
            .await?;

            if !pass {
                bus.publish(
                    "compliance.violation",
                    serde_json::json!({
                        "instance_id": instance.id,
                        "project": project,
                        "contract": summary.name,
                        "violations": run.violations,
                    }),
                    "compliance-scheduler",
                )
                .await?;
            }

            runs.push(run);
        }
    }

    Ok(runs)
}

pub async fn history(pool: &SqlitePool, instance_id: Option<Uuid>, limit: i64) -> Result<Vec<ComplianceRun>> {
    match instance_id {
        Some(id) => {
            let mut runs = koor_db::compliance::list_for_instance(pool, id).await?;
            runs.truncate(limit.max(0) as usize);
            Ok(runs)
        }
        None => {
            // No instance filter: merge every instance's runs, newest first.
            let all = koor_db::instances::list(pool).await?;
            let mut merged: BTreeMap<i64, ComplianceRun> = BTreeMap::new();
            for instance in all {
                for run in koor_db::compliance::list_for_instance(pool, instance.id).await? {
                    merged.insert(run.id, run);
                }
            }
            let mut runs: Vec<_> = merged.into_values().collect();
            runs.sort_by(|a, b| b.run_at.cmp(&a.run_at));
            runs.truncate(limit.max(0) as usize);
            Ok(runs)
        }
    }
}

/// Spawns the compliance scheduler's ticker (spec.md §4.10 default 5 min).
pub fn spawn_scheduler(pool: SqlitePool, bus: Bus, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run_all(&pool, &bus).await {
                tracing::warn!(error = %e, "compliance run failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use koor_db::instances::NewInstance;

    async fn memory_pool() -> SqlitePool {
        let pool = koor_db::connect("sqlite::memory:").await.unwrap();
        koor_db::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn empty_endpoints_fails_and_publishes() {
        let pool = memory_pool().await;
        let bus = Bus::new(pool.clone());
        let (_id, mut rx) = bus.subscribe("compliance.violation").await.unwrap();

        let inst = koor_db::instances::register(
            &pool,
            NewInstance {
                name: "a",
                workspace: "proj-a",
                intent: "",
                stack: "rust",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        koor_db::instances::activate(&pool, inst.id).await.unwrap();

        koor_db::specs::put(
            &pool,
            "proj-a",
            "api",
            br#"{"kind":"contract","version":1,"endpoints":{}}"#,
            "h",
        )
        .await
        .unwrap();

        let runs = run_all(&pool, &bus).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].pass);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "compliance.violation");
    }

    #[tokio::test]
    async fn well_formed_contract_passes() {
        let pool = memory_pool().await;
        let bus = Bus::new(pool.clone());

        let inst = koor_db::instances::register(
            &pool,
            NewInstance {
                name: "a",
                workspace: "proj-a",
                intent: "",
                stack: "rust",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        koor_db::instances::activate(&pool, inst.id).await.unwrap();

        let contract = serde_json::json!({
            "kind": "contract",
            "version": 1,
            "endpoints": {
                "get_user": {
                    "query": {},
                    "request": {},
                    "response": {"id": {"type": "string", "required": true}},
                    "response_array": {},
                    "error": {},
                    "response_status": 200
                }
            }
        });
        koor_db::specs::put(&pool, "proj-a", "api", contract.to_string().as_bytes(), "h")
            .await
            .unwrap();

        let runs = run_all(&pool, &bus).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].pass);
    }

    #[tokio::test]
    async fn instances_without_workspace_are_skipped() {
        let pool = memory_pool().await;
        let bus = Bus::new(pool.clone());

        let inst = koor_db::instances::register(
            &pool,
            NewInstance {
                name: "a",
                workspace: "",
                intent: "",
                stack: "rust",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        koor_db::instances::activate(&pool, inst.id).await.unwrap();

        let runs = run_all(&pool, &bus).await.unwrap();
        assert!(runs.is_empty());
    }
}
