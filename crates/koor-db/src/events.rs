//! `events` row access (spec.md §4.4): the durable append-only log backing
//! the event bus. Fan-out lives in `koor-bus`; this module inserts,
//! paginates (descending by `id`), and prunes.

use chrono::{DateTime, Utc};
use glob::Pattern;
use koor_schemas::{Error, Event, Result};
use sqlx::{Row, SqlitePool};

pub async fn insert(
    pool: &SqlitePool,
    topic: &str,
    data: &serde_json::Value,
    source: &str,
) -> Result<Event> {
    let now = Utc::now();
    let data_text = serde_json::to_string(data)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        insert into events (topic, data, source, created_at)
        values (?1, ?2, ?3, ?4)
        returning id
        "#,
    )
    .bind(topic)
    .bind(&data_text)
    .bind(source)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(Event {
        id,
        topic: topic.to_string(),
        data: data.clone(),
        source: source.to_string(),
        created_at: now,
    })
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<Event> {
    let data_text: String = row.try_get("data")?;
    Ok(Event {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        data: serde_json::from_str(&data_text)?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Event>> {
    let rows = sqlx::query(
        "select id, topic, data, source, created_at from events order by id desc limit ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_event(row)?);
    }
    Ok(out)
}

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::InvalidInput(format!("bad glob pattern: {e}")))
}

/// `History(last, topic_pattern)` (spec.md §4.4): the most recent `limit`
/// events, descending by `id`. When `topic_pattern` is set and isn't `""` or
/// `"*"`, over-fetches then filters in memory so the page returned still
/// holds `limit` matching events rather than `limit` raw rows.
pub async fn recent(pool: &SqlitePool, limit: i64, topic_pattern: Option<&str>) -> Result<Vec<Event>> {
    match topic_pattern {
        None => fetch_recent(pool, limit).await,
        Some(p) if p.is_empty() || p == "*" => fetch_recent(pool, limit).await,
        Some(p) => {
            let compiled = compile_pattern(p)?;
            let overfetch = limit.saturating_mul(5).max(limit).min(10_000);
            let rows = fetch_recent(pool, overfetch).await?;
            Ok(rows
                .into_iter()
                .filter(|e| compiled.matches(&e.topic))
                .take(limit.max(0) as usize)
                .collect())
        }
    }
}

/// `HistoryByTimeRange(from, to, source, topic, last)` (spec.md §4.4): same
/// descending-by-`id` contract as `recent`, narrowed to `[since, until]` on
/// `created_at`, an exact `source` match, and the same glob-over-topic
/// filter, capped at `last`.
pub async fn by_time_range(
    pool: &SqlitePool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    source: Option<&str>,
    topic_pattern: Option<&str>,
    last: i64,
) -> Result<Vec<Event>> {
    let rows = if let Some(src) = source {
        sqlx::query(
            r#"
            select id, topic, data, source, created_at
            from events
            where created_at >= ?1 and created_at <= ?2 and source = ?3
            order by id desc
            "#,
        )
        .bind(since)
        .bind(until)
        .bind(src)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            select id, topic, data, source, created_at
            from events
            where created_at >= ?1 and created_at <= ?2
            order by id desc
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(pool)
        .await?
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_event(row)?);
    }

    if let Some(p) = topic_pattern {
        if !(p.is_empty() || p == "*") {
            let compiled = compile_pattern(p)?;
            out.retain(|e| compiled.matches(&e.topic));
        }
    }
    out.truncate(last.max(0) as usize);
    Ok(out)
}

/// Delete all but the most recent `max_history` rows. Called by the bus'
/// pruning ticker (spec.md §4.4 default `maxHistory` 1000).
pub async fn prune(pool: &SqlitePool, max_history: i64) -> Result<u64> {
    let res = sqlx::query(
        r#"
        delete from events
        where id not in (
            select id from events order by id desc limit ?1
        )
        "#,
    )
    .bind(max_history)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn insert_and_recent_round_trip() {
        let pool = memory_pool().await;
        insert(&pool, "agent.registered", &serde_json::json!({"id": 1}), "api")
            .await
            .unwrap();
        insert(&pool, "agent.stale", &serde_json::json!({"id": 1}), "liveness")
            .await
            .unwrap();

        let recent = recent(&pool, 10, None).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].topic, "agent.stale");
        assert_eq!(recent[1].topic, "agent.registered");
    }

    #[tokio::test]
    async fn recent_filters_by_topic_pattern() {
        let pool = memory_pool().await;
        insert(&pool, "agent.registered", &serde_json::json!({}), "api").await.unwrap();
        insert(&pool, "compliance.violation", &serde_json::json!({}), "scheduler")
            .await
            .unwrap();
        insert(&pool, "agent.stale", &serde_json::json!({}), "liveness").await.unwrap();

        let matched = recent(&pool, 10, Some("agent.*")).await.unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].topic, "agent.stale");
        assert_eq!(matched[1].topic, "agent.registered");
    }

    #[tokio::test]
    async fn prune_keeps_only_max_history() {
        let pool = memory_pool().await;
        for i in 0..10 {
            insert(&pool, "t", &serde_json::json!({"i": i}), "src")
                .await
                .unwrap();
        }
        let pruned = prune(&pool, 3).await.unwrap();
        assert_eq!(pruned, 7);
        let remaining = recent(&pool, 100, None).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn by_time_range_filters_source_and_caps_last() {
        let pool = memory_pool().await;
        insert(&pool, "a", &serde_json::json!({}), "api").await.unwrap();
        insert(&pool, "b", &serde_json::json!({}), "scheduler").await.unwrap();
        insert(&pool, "c", &serde_json::json!({}), "api").await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let until = Utc::now() + chrono::Duration::hours(1);

        let api_only = by_time_range(&pool, since, until, Some("api"), None, 10).await.unwrap();
        assert_eq!(api_only.len(), 2);
        assert!(api_only.iter().all(|e| e.source == "api"));

        let capped = by_time_range(&pool, since, until, None, None, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].topic, "c");
    }
}
