//! `state` / `state_history` row access (spec.md §4.2).

use chrono::Utc;
use koor_schemas::{Error, Result, StateEntry, StateSummary};
use sqlx::{Row, SqlitePool};

pub async fn put(
    pool: &SqlitePool,
    key: &str,
    value: &[u8],
    hash: &str,
    content_type: &str,
    updated_by: &str,
) -> Result<StateEntry> {
    let mut tx = pool.begin().await?;

    let prev_version: Option<i64> =
        sqlx::query_scalar("select version from state where key = ?1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
    let version = prev_version.unwrap_or(0) + 1;
    let now = Utc::now();

    sqlx::query(
        r#"
        insert into state (key, value, version, hash, content_type, updated_at, updated_by)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        on conflict(key) do update set
            value = excluded.value,
            version = excluded.version,
            hash = excluded.hash,
            content_type = excluded.content_type,
            updated_at = excluded.updated_at,
            updated_by = excluded.updated_by
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(version)
    .bind(hash)
    .bind(content_type)
    .bind(now)
    .bind(updated_by)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        insert into state_history (key, version, value, hash, content_type, updated_at, updated_by)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(key)
    .bind(version)
    .bind(value)
    .bind(hash)
    .bind(content_type)
    .bind(now)
    .bind(updated_by)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(StateEntry {
        key: key.to_string(),
        value: value.to_vec(),
        version,
        hash: hash.to_string(),
        content_type: content_type.to_string(),
        updated_at: now,
        updated_by: updated_by.to_string(),
    })
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<StateEntry> {
    let row = sqlx::query(
        "select key, value, version, hash, content_type, updated_at, updated_by from state where key = ?1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("state key {key}")))?;

    Ok(StateEntry {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        version: row.try_get("version")?,
        hash: row.try_get("hash")?,
        content_type: row.try_get("content_type")?,
        updated_at: row.try_get("updated_at")?,
        updated_by: row.try_get("updated_by")?,
    })
}

pub async fn list(pool: &SqlitePool, prefix: &str) -> Result<Vec<StateSummary>> {
    let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
    let rows = sqlx::query(
        r#"
        select key, version, hash, content_type, updated_at, updated_by
        from state
        where key like ?1 escape '\'
        order by key asc
        "#,
    )
    .bind(like)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StateSummary {
            key: row.try_get("key")?,
            version: row.try_get("version")?,
            hash: row.try_get("hash")?,
            content_type: row.try_get("content_type")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
        });
    }
    Ok(out)
}

pub async fn delete(pool: &SqlitePool, key: &str) -> Result<()> {
    let res = sqlx::query("delete from state where key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("state key {key}")));
    }
    sqlx::query("delete from state_history where key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn history(pool: &SqlitePool, key: &str) -> Result<Vec<StateEntry>> {
    let rows = sqlx::query(
        r#"
        select key, value, version, hash, content_type, updated_at, updated_by
        from state_history
        where key = ?1
        order by version desc
        "#,
    )
    .bind(key)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StateEntry {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            version: row.try_get("version")?,
            hash: row.try_get("hash")?,
            content_type: row.try_get("content_type")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
        });
    }
    Ok(out)
}

pub async fn get_version(pool: &SqlitePool, key: &str, version: i64) -> Result<StateEntry> {
    let row = sqlx::query(
        r#"
        select key, value, version, hash, content_type, updated_at, updated_by
        from state_history
        where key = ?1 and version = ?2
        "#,
    )
    .bind(key)
    .bind(version)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("state key {key} version {version}")))?;

    Ok(StateEntry {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        version: row.try_get("version")?,
        hash: row.try_get("hash")?,
        content_type: row.try_get("content_type")?,
        updated_at: row.try_get("updated_at")?,
        updated_by: row.try_get("updated_by")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let pool = memory_pool().await;
        put(&pool, "a/b", b"hello", "h1", "text/plain", "tester")
            .await
            .unwrap();
        let got = get(&pool, "a/b").await.unwrap();
        assert_eq!(got.value, b"hello");
        assert_eq!(got.version, 1);
    }

    #[tokio::test]
    async fn put_twice_bumps_version_and_keeps_history() {
        let pool = memory_pool().await;
        put(&pool, "k", b"v1", "h1", "text/plain", "a").await.unwrap();
        put(&pool, "k", b"v2", "h2", "text/plain", "a").await.unwrap();
        let current = get(&pool, "k").await.unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.value, b"v2");

        let hist = history(&pool, "k").await.unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].value, b"v2");
        assert_eq!(hist[1].value, b"v1");

        let old = get_version(&pool, "k", 1).await.unwrap();
        assert_eq!(old.value, b"v1");
    }

    #[tokio::test]
    async fn delete_removes_key_and_history() {
        let pool = memory_pool().await;
        put(&pool, "k", b"v", "h", "text/plain", "a").await.unwrap();
        delete(&pool, "k").await.unwrap();
        assert!(get(&pool, "k").await.is_err());
        assert!(history(&pool, "k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let pool = memory_pool().await;
        put(&pool, "proj/a", b"1", "h", "text/plain", "a").await.unwrap();
        put(&pool, "proj/b", b"2", "h", "text/plain", "a").await.unwrap();
        put(&pool, "other/c", b"3", "h", "text/plain", "a").await.unwrap();

        let matches = list(&pool, "proj/").await.unwrap();
        assert_eq!(matches.len(), 2);
    }
}
