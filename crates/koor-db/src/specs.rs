//! `specs` row access (spec.md §4.3): a versioned registry of spec blobs
//! keyed by `(project, name)`.

use chrono::Utc;
use koor_schemas::{Error, Result, Spec, SpecSummary};
use sqlx::{Row, SqlitePool};

pub async fn put(
    pool: &SqlitePool,
    project: &str,
    name: &str,
    data: &[u8],
    hash: &str,
) -> Result<Spec> {
    let prev_version: Option<i64> =
        sqlx::query_scalar("select version from specs where project = ?1 and name = ?2")
            .bind(project)
            .bind(name)
            .fetch_optional(pool)
            .await?;
    let version = prev_version.unwrap_or(0) + 1;
    let now = Utc::now();

    sqlx::query(
        r#"
        insert into specs (project, name, data, version, hash, updated_at)
        values (?1, ?2, ?3, ?4, ?5, ?6)
        on conflict(project, name) do update set
            data = excluded.data,
            version = excluded.version,
            hash = excluded.hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(project)
    .bind(name)
    .bind(data)
    .bind(version)
    .bind(hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Spec {
        project: project.to_string(),
        name: name.to_string(),
        data: data.to_vec(),
        version,
        hash: hash.to_string(),
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, project: &str, name: &str) -> Result<Spec> {
    let row = sqlx::query(
        "select project, name, data, version, hash, updated_at from specs where project = ?1 and name = ?2",
    )
    .bind(project)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("spec {project}/{name}")))?;

    Ok(Spec {
        project: row.try_get("project")?,
        name: row.try_get("name")?,
        data: row.try_get("data")?,
        version: row.try_get("version")?,
        hash: row.try_get("hash")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn list(pool: &SqlitePool, project: &str) -> Result<Vec<SpecSummary>> {
    let rows = sqlx::query(
        "select project, name, version, hash, updated_at from specs where project = ?1 order by name asc",
    )
    .bind(project)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(SpecSummary {
            project: row.try_get("project")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            hash: row.try_get("hash")?,
            updated_at: row.try_get("updated_at")?,
        });
    }
    Ok(out)
}

pub async fn delete(pool: &SqlitePool, project: &str, name: &str) -> Result<()> {
    let res = sqlx::query("delete from specs where project = ?1 and name = ?2")
        .bind(project)
        .bind(name)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("spec {project}/{name}")));
    }
    Ok(())
}
