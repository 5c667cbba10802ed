//! `instances` row access (spec.md §3, §4.6, §4.7): agent registration,
//! discovery, heartbeat, and the liveness sweep's status transitions.

use chrono::{DateTime, Utc};
use koor_schemas::{Error, Instance, InstanceStatus, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_instance(row: sqlx::sqlite::SqliteRow, include_token: bool) -> Result<Instance> {
    let capabilities_text: String = row.try_get("capabilities")?;
    let status_text: String = row.try_get("status")?;
    let token_text: String = row.try_get("token")?;

    Ok(Instance {
        id: row.try_get::<String, _>("id")?.parse().map_err(|_| {
            Error::Internal("corrupt instance id in row".to_string())
        })?,
        name: row.try_get("name")?,
        workspace: row.try_get("workspace")?,
        intent: row.try_get("intent")?,
        stack: row.try_get("stack")?,
        capabilities: serde_json::from_str(&capabilities_text)?,
        status: status_text.parse()?,
        token: if include_token {
            Some(token_text.parse().map_err(|_| {
                Error::Internal("corrupt instance token in row".to_string())
            })?)
        } else {
            None
        },
        registered_at: row.try_get("registered_at")?,
        last_seen: row.try_get("last_seen")?,
    })
}

pub struct NewInstance<'a> {
    pub name: &'a str,
    pub workspace: &'a str,
    pub intent: &'a str,
    pub stack: &'a str,
    pub capabilities: &'a [String],
}

/// Registers a new instance in `pending` status and mints its bearer token.
/// The token is returned once here; later reads omit it (spec.md §3).
pub async fn register(pool: &SqlitePool, new: NewInstance<'_>) -> Result<Instance> {
    let id = Uuid::new_v4();
    let token = Uuid::new_v4();
    let now = Utc::now();
    let capabilities_text = serde_json::to_string(new.capabilities)?;

    sqlx::query(
        r#"
        insert into instances
            (id, name, workspace, intent, stack, capabilities, status, token, registered_at, last_seen)
        values (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)
        "#,
    )
    .bind(id.to_string())
    .bind(new.name)
    .bind(new.workspace)
    .bind(new.intent)
    .bind(new.stack)
    .bind(&capabilities_text)
    .bind(token.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Instance {
        id,
        name: new.name.to_string(),
        workspace: new.workspace.to_string(),
        intent: new.intent.to_string(),
        stack: new.stack.to_string(),
        capabilities: new.capabilities.to_vec(),
        status: InstanceStatus::Pending,
        token: Some(token),
        registered_at: now,
        last_seen: now,
    })
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Instance> {
    let row = sqlx::query(
        r#"
        select id, name, workspace, intent, stack, capabilities, status, token, registered_at, last_seen
        from instances where id = ?1
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("instance {id}")))?;
    row_to_instance(row, false)
}

/// Looks up an instance by its bearer token, for the auth boundary
/// middleware. Returns the token so the caller can compare it, unlike
/// every other read path.
pub async fn find_by_token(pool: &SqlitePool, token: Uuid) -> Result<Instance> {
    let row = sqlx::query(
        r#"
        select id, name, workspace, intent, stack, capabilities, status, token, registered_at, last_seen
        from instances where token = ?1
        "#,
    )
    .bind(token.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("instance for token".to_string()))?;
    row_to_instance(row, true)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Instance>> {
    let rows = sqlx::query(
        r#"
        select id, name, workspace, intent, stack, capabilities, status, token, registered_at, last_seen
        from instances order by registered_at asc
        "#,
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(|r| row_to_instance(r, false)).collect()
}

pub async fn list_by_status(pool: &SqlitePool, status: InstanceStatus) -> Result<Vec<Instance>> {
    let rows = sqlx::query(
        r#"
        select id, name, workspace, intent, stack, capabilities, status, token, registered_at, last_seen
        from instances where status = ?1 order by registered_at asc
        "#,
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(|r| row_to_instance(r, false)).collect()
}

/// Discovery filter: active instances whose name/workspace/stack match (if
/// given) and whose capabilities are a superset of `capabilities` (if given).
pub async fn discover(
    pool: &SqlitePool,
    name: Option<&str>,
    workspace: Option<&str>,
    stack: Option<&str>,
    capabilities: &[String],
) -> Result<Vec<Instance>> {
    let all = list_by_status(pool, InstanceStatus::Active).await?;
    Ok(all
        .into_iter()
        .filter(|inst| name.map_or(true, |n| inst.name == n))
        .filter(|inst| workspace.map_or(true, |w| inst.workspace == w))
        .filter(|inst| stack.map_or(true, |s| inst.stack == s))
        .filter(|inst| {
            capabilities
                .iter()
                .all(|c| inst.capabilities.iter().any(|ic| ic == c))
        })
        .collect())
}

pub async fn activate(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now();
    let res = sqlx::query(
        "update instances set status = 'active', last_seen = ?2 where id = ?1",
    )
    .bind(id.to_string())
    .bind(now)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("instance {id}")));
    }
    Ok(())
}

/// Heartbeat: bumps `last_seen` and reactivates a `stale` instance back to
/// `active` (spec.md §4.6 transition table).
pub async fn heartbeat(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let now = Utc::now();
    let res = sqlx::query(
        r#"
        update instances
        set last_seen = ?2,
            status = case when status = 'stale' then 'active' else status end
        where id = ?1
        "#,
    )
    .bind(id.to_string())
    .bind(now)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("instance {id}")));
    }
    Ok(())
}

pub async fn set_intent(pool: &SqlitePool, id: Uuid, intent: &str) -> Result<()> {
    let res = sqlx::query("update instances set intent = ?2 where id = ?1")
        .bind(id.to_string())
        .bind(intent)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("instance {id}")));
    }
    Ok(())
}

pub async fn set_capabilities(pool: &SqlitePool, id: Uuid, capabilities: &[String]) -> Result<()> {
    let capabilities_text = serde_json::to_string(capabilities)?;
    let res = sqlx::query("update instances set capabilities = ?2 where id = ?1")
        .bind(id.to_string())
        .bind(capabilities_text)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("instance {id}")));
    }
    Ok(())
}

/// Marks every `active` instance whose `last_seen` is older than
/// `stale_before` as `stale`, returning the transitioned ids (spec.md §4.7,
/// so the liveness monitor can publish `agent.stale` for each).
pub async fn mark_stale_before(
    pool: &SqlitePool,
    stale_before: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        "select id from instances where status = 'active' and last_seen < ?1",
    )
    .bind(stale_before)
    .fetch_all(pool)
    .await?;

    let mut ids = Vec::with_capacity(rows.len());
    for row in &rows {
        let id_text: String = row.try_get("id")?;
        ids.push(
            id_text
                .parse()
                .map_err(|_| Error::Internal("corrupt instance id in row".to_string()))?,
        );
    }

    if !ids.is_empty() {
        sqlx::query(
            "update instances set status = 'stale' where status = 'active' and last_seen < ?1",
        )
        .bind(stale_before)
        .execute(pool)
        .await?;
    }

    Ok(ids)
}

pub async fn deregister(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let res = sqlx::query("delete from instances where id = ?1")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("instance {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;
    use chrono::Duration;

    fn new_instance() -> NewInstance<'static> {
        NewInstance {
            name: "agent-1",
            workspace: "/repo",
            intent: "fix tests",
            stack: "rust",
            capabilities: &[],
        }
    }

    #[tokio::test]
    async fn register_then_get_hides_token() {
        let pool = memory_pool().await;
        let inst = register(&pool, new_instance()).await.unwrap();
        assert!(inst.token.is_some());

        let got = get(&pool, inst.id).await.unwrap();
        assert!(got.token.is_none());
        assert_eq!(got.status, InstanceStatus::Pending);
    }

    #[tokio::test]
    async fn heartbeat_reactivates_stale() {
        let pool = memory_pool().await;
        let inst = register(&pool, new_instance()).await.unwrap();
        activate(&pool, inst.id).await.unwrap();

        let cutoff = Utc::now() + Duration::seconds(1);
        let staled = mark_stale_before(&pool, cutoff).await.unwrap();
        assert_eq!(staled, vec![inst.id]);

        heartbeat(&pool, inst.id).await.unwrap();
        let got = get(&pool, inst.id).await.unwrap();
        assert_eq!(got.status, InstanceStatus::Active);
    }

    #[tokio::test]
    async fn discover_filters_by_stack_and_capabilities() {
        let pool = memory_pool().await;
        let a = register(
            &pool,
            NewInstance {
                name: "a",
                workspace: "/a",
                intent: "",
                stack: "rust",
                capabilities: &["build".to_string()],
            },
        )
        .await
        .unwrap();
        activate(&pool, a.id).await.unwrap();

        let b = register(
            &pool,
            NewInstance {
                name: "b",
                workspace: "/b",
                intent: "",
                stack: "python",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        activate(&pool, b.id).await.unwrap();

        let found = discover(&pool, None, None, Some("rust"), &["build".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[tokio::test]
    async fn discover_filters_by_name_and_workspace() {
        let pool = memory_pool().await;
        let a = register(
            &pool,
            NewInstance {
                name: "a",
                workspace: "/a",
                intent: "",
                stack: "rust",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        activate(&pool, a.id).await.unwrap();

        let b = register(
            &pool,
            NewInstance {
                name: "b",
                workspace: "/b",
                intent: "",
                stack: "rust",
                capabilities: &[],
            },
        )
        .await
        .unwrap();
        activate(&pool, b.id).await.unwrap();

        let by_name = discover(&pool, Some("a"), None, None, &[]).await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, a.id);

        let by_workspace = discover(&pool, None, Some("/b"), None, &[]).await.unwrap();
        assert_eq!(by_workspace.len(), 1);
        assert_eq!(by_workspace[0].id, b.id);
    }
}
