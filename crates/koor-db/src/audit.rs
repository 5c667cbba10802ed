//! `audit_log` row access: append-only record of who did what (spec.md §4.1
//! ambient concerns) — actor/action/target, no payload or hash chain.

use chrono::Utc;
use koor_schemas::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn record(pool: &SqlitePool, actor: &str, action: &str, target: &str) -> Result<()> {
    sqlx::query(
        "insert into audit_log (actor, action, target, created_at) values (?1, ?2, ?3, ?4)",
    )
    .bind(actor)
    .bind(action)
    .bind(target)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "select id, actor, action, target, created_at from audit_log order by id desc limit ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AuditEntry {
            id: row.try_get("id")?,
            actor: row.try_get("actor")?,
            action: row.try_get("action")?,
            target: row.try_get("target")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn record_then_recent() {
        let pool = memory_pool().await;
        record(&pool, "agent-1", "state.put", "proj/key").await.unwrap();
        let entries = recent(&pool, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "state.put");
    }
}
