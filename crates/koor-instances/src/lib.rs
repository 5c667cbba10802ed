//! Instance registry and liveness monitor (spec.md §3, §4.6, §4.7): agents
//! register, heartbeat, and announce intent; a background sweep demotes
//! anyone who goes quiet past the stale threshold and tells the bus about
//! it.

use chrono::{Duration as ChronoDuration, Utc};
use koor_bus::Bus;
use koor_db::instances::NewInstance;
use koor_schemas::{Instance, InstanceStatus, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn register(
    pool: &SqlitePool,
    name: &str,
    workspace: &str,
    intent: &str,
    stack: &str,
    capabilities: &[String],
) -> Result<Instance> {
    koor_db::instances::register(
        pool,
        NewInstance {
            name,
            workspace,
            intent,
            stack,
            capabilities,
        },
    )
    .await
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Instance> {
    koor_db::instances::get(pool, id).await
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Instance>> {
    koor_db::instances::list(pool).await
}

pub async fn list_by_status(pool: &SqlitePool, status: InstanceStatus) -> Result<Vec<Instance>> {
    koor_db::instances::list_by_status(pool, status).await
}

pub async fn discover(
    pool: &SqlitePool,
    name: Option<&str>,
    workspace: Option<&str>,
    stack: Option<&str>,
    capabilities: &[String],
) -> Result<Vec<Instance>> {
    koor_db::instances::discover(pool, name, workspace, stack, capabilities).await
}

pub async fn authenticate(pool: &SqlitePool, token: Uuid) -> Result<Instance> {
    koor_db::instances::find_by_token(pool, token).await
}

pub async fn activate(pool: &SqlitePool, bus: &Bus, id: Uuid) -> Result<()> {
    koor_db::instances::activate(pool, id).await?;
    bus.publish(
        "agent.activated",
        serde_json::json!({"instance_id": id}),
        "instances",
    )
    .await?;
    Ok(())
}

pub async fn heartbeat(pool: &SqlitePool, id: Uuid) -> Result<()> {
    koor_db::instances::heartbeat(pool, id).await
}

pub async fn set_intent(pool: &SqlitePool, id: Uuid, intent: &str) -> Result<()> {
    koor_db::instances::set_intent(pool, id, intent).await
}

pub async fn set_capabilities(pool: &SqlitePool, id: Uuid, capabilities: &[String]) -> Result<()> {
    koor_db::instances::set_capabilities(pool, id, capabilities).await
}

pub async fn deregister(pool: &SqlitePool, bus: &Bus, id: Uuid) -> Result<()> {
    koor_db::instances::deregister(pool, id).await?;
    bus.publish(
        "agent.deregistered",
        serde_json::json!({"instance_id": id}),
        "instances",
    )
    .await?;
    Ok(())
}

/// One liveness sweep: demotes every `active` instance whose `last_seen` is
/// older than `stale_after` to `stale` and publishes `agent.stale` for each
/// (spec.md §4.7). Returns the demoted instance ids.
pub async fn sweep_stale(
    pool: &SqlitePool,
    bus: &Bus,
    stale_after: ChronoDuration,
) -> Result<Vec<Uuid>> {
    let cutoff = Utc::now() - stale_after;
    let staled = koor_db::instances::mark_stale_before(pool, cutoff).await?;
    for id in &staled {
        bus.publish("agent.stale", serde_json::json!({"instance_id": id}), "liveness")
            .await?;
    }
    Ok(staled)
}

/// Spawns the liveness monitor ticker (spec.md §4.7 default interval 60s,
/// default staleness threshold 5 minutes). Mirrors the daemon's
/// `state::spawn_heartbeat` shape.
pub fn spawn_liveness_monitor(
    pool: SqlitePool,
    bus: Bus,
    interval: std::time::Duration,
    stale_after: ChronoDuration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep_stale(&pool, &bus, stale_after).await {
                Ok(staled) if !staled.is_empty() => {
                    tracing::info!(count = staled.len(), "liveness sweep marked instances stale");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "liveness sweep failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = koor_db::connect("sqlite::memory:").await.unwrap();
        koor_db::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn sweep_marks_stale_and_publishes() {
        let pool = memory_pool().await;
        let bus = Bus::new(pool.clone());
        let (_id, mut rx) = bus.subscribe("agent.stale").await.unwrap();

        let inst = register(&pool, "a", "/repo", "fix", "rust", &[]).await.unwrap();
        activate(&pool, &bus, inst.id).await.unwrap();

        let staled = sweep_stale(&pool, &bus, ChronoDuration::seconds(-1)).await.unwrap();
        assert_eq!(staled, vec![inst.id]);

        let got = get(&pool, inst.id).await.unwrap();
        assert_eq!(got.status, InstanceStatus::Stale);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "agent.stale");
    }

    #[tokio::test]
    async fn heartbeat_reactivates() {
        let pool = memory_pool().await;
        let bus = Bus::new(pool.clone());
        let inst = register(&pool, "a", "/repo", "fix", "rust", &[]).await.unwrap();
        activate(&pool, &bus, inst.id).await.unwrap();
        sweep_stale(&pool, &bus, ChronoDuration::seconds(-1)).await.unwrap();

        heartbeat(&pool, inst.id).await.unwrap();
        let got = get(&pool, inst.id).await.unwrap();
        assert_eq!(got.status, InstanceStatus::Active);
    }
}
