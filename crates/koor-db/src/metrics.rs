//! `agent_metrics` row access: per-instance counters (e.g. `lint.violations`,
//! `compliance.failures`) the daemon increments as it processes requests.
//! Kept separate from `instances` since metrics grow without bound on keys
//! while the instance row itself stays fixed-width.

use koor_schemas::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn increment(pool: &SqlitePool, instance_id: Uuid, metric: &str, by: i64) -> Result<()> {
    sqlx::query(
        r#"
        insert into agent_metrics (instance_id, metric, count)
        values (?1, ?2, ?3)
        on conflict(instance_id, metric) do update set count = count + excluded.count
        "#,
    )
    .bind(instance_id.to_string())
    .bind(metric)
    .bind(by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn for_instance(pool: &SqlitePool, instance_id: Uuid) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "select metric, count from agent_metrics where instance_id = ?1 order by metric asc",
    )
    .bind(instance_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((row.try_get("metric")?, row.try_get("count")?));
    }
    Ok(out)
}
