//! Shared test support: an in-memory SQLite pool bootstrap + migration
//! runner, and a handful of fixture builders used across the daemon's
//! scenario tests.

use anyhow::{Context, Result};
use koor_db::instances::NewInstance;
use koor_schemas::Instance;
use sqlx::SqlitePool;

/// A fresh, migrated in-memory pool. One per test — SQLite's `:memory:`
/// database is private to the connection that opened it.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = koor_db::connect("sqlite::memory:")
        .await
        .context("open in-memory sqlite pool")?;
    koor_db::migrate(&pool).await.context("run migrations")?;
    Ok(pool)
}

/// Registers and activates an instance in one call, for tests that only
/// care about the post-activation state.
pub async fn active_instance(pool: &SqlitePool, name: &str, workspace: &str) -> Result<Instance> {
    let inst = koor_db::instances::register(
        pool,
        NewInstance {
            name,
            workspace,
            intent: "",
            stack: "rust",
            capabilities: &[],
        },
    )
    .await?;
    koor_db::instances::activate(pool, inst.id).await?;
    koor_db::instances::get(pool, inst.id).await.map_err(Into::into)
}

/// A minimal well-formed contract JSON blob, for tests that need a spec
/// body without constructing one field by field.
pub fn sample_contract_json() -> serde_json::Value {
    serde_json::json!({
        "kind": "contract",
        "version": 1,
        "endpoints": {
            "GET /v1/widgets": {
                "query": {},
                "request": {},
                "response": {
                    "id": {"type": "string", "required": true},
                    "name": {"type": "string", "required": true, "nullable": true}
                },
                "response_array": {},
                "error": {},
                "response_status": 200
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pool_is_migrated() {
        let pool = memory_pool().await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn active_instance_fixture_is_active() {
        let pool = memory_pool().await.unwrap();
        let inst = active_instance(&pool, "agent-a", "proj-a").await.unwrap();
        assert_eq!(inst.status, koor_schemas::InstanceStatus::Active);
    }
}
