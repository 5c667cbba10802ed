//! `webhooks` row access (spec.md §4.11).

use chrono::Utc;
use koor_schemas::{Error, Result, Webhook};
use sqlx::{Row, SqlitePool};

fn row_to_webhook(row: sqlx::sqlite::SqliteRow) -> Result<Webhook> {
    let patterns_text: String = row.try_get("patterns")?;
    Ok(Webhook {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        patterns: serde_json::from_str(&patterns_text)?,
        secret: row.try_get("secret")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        last_fired: row.try_get("last_fired")?,
        fail_count: row.try_get("fail_count")?,
    })
}

pub async fn create(
    pool: &SqlitePool,
    url: &str,
    patterns: &[String],
    secret: Option<&str>,
) -> Result<Webhook> {
    let now = Utc::now();
    let patterns_text = serde_json::to_string(patterns)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        insert into webhooks (url, patterns, secret, active, created_at, fail_count)
        values (?1, ?2, ?3, 1, ?4, 0)
        returning id
        "#,
    )
    .bind(url)
    .bind(&patterns_text)
    .bind(secret)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(Webhook {
        id,
        url: url.to_string(),
        patterns: patterns.to_vec(),
        secret: secret.map(str::to_string),
        active: true,
        created_at: now,
        last_fired: None,
        fail_count: 0,
    })
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Webhook>> {
    let rows = sqlx::query("select * from webhooks order by id asc")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_webhook).collect()
}

pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Webhook>> {
    let rows = sqlx::query("select * from webhooks where active = 1 order by id asc")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_webhook).collect()
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Webhook> {
    let row = sqlx::query("select * from webhooks where id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("webhook {id}")))?;
    row_to_webhook(row)
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    let res = sqlx::query("delete from webhooks where id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("webhook {id}")));
    }
    Ok(())
}

/// Record a successful delivery: reset `fail_count`, stamp `last_fired`.
pub async fn record_success(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "update webhooks set fail_count = 0, last_fired = ?2 where id = ?1",
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed delivery attempt and auto-disable once `fail_count`
/// reaches `disable_at` (spec.md §4.11 default 10).
pub async fn record_failure(pool: &SqlitePool, id: i64, disable_at: i64) -> Result<bool> {
    let fail_count: i64 = sqlx::query_scalar(
        "update webhooks set fail_count = fail_count + 1 where id = ?1 returning fail_count",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let disabled = fail_count >= disable_at;
    if disabled {
        sqlx::query("update webhooks set active = 0 where id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(disabled)
}
