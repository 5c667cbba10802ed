//! `templates` row access. Lightweight named JSON blobs scoped per project
//! (scaffolding/boilerplate an agent can fetch by name) — the same shape as
//! `specs` without versioning, since templates are replaced wholesale.

use chrono::Utc;
use koor_schemas::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub project: String,
    pub name: String,
    pub data: serde_json::Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn put(
    pool: &SqlitePool,
    project: &str,
    name: &str,
    data: &serde_json::Value,
) -> Result<Template> {
    let now = Utc::now();
    let data_text = serde_json::to_string(data)?;

    sqlx::query(
        r#"
        insert into templates (project, name, data, updated_at)
        values (?1, ?2, ?3, ?4)
        on conflict(project, name) do update set
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(project)
    .bind(name)
    .bind(&data_text)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Template {
        project: project.to_string(),
        name: name.to_string(),
        data: data.clone(),
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, project: &str, name: &str) -> Result<Template> {
    let row = sqlx::query("select project, name, data, updated_at from templates where project = ?1 and name = ?2")
        .bind(project)
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("template {project}/{name}")))?;

    let data_text: String = row.try_get("data")?;
    Ok(Template {
        project: row.try_get("project")?,
        name: row.try_get("name")?,
        data: serde_json::from_str(&data_text)?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn list(pool: &SqlitePool, project: &str) -> Result<Vec<Template>> {
    let rows = sqlx::query("select project, name, data, updated_at from templates where project = ?1 order by name asc")
        .bind(project)
        .fetch_all(pool)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let data_text: String = row.try_get("data")?;
        out.push(Template {
            project: row.try_get("project")?,
            name: row.try_get("name")?,
            data: serde_json::from_str(&data_text)?,
            updated_at: row.try_get("updated_at")?,
        });
    }
    Ok(out)
}

pub async fn delete(pool: &SqlitePool, project: &str, name: &str) -> Result<()> {
    let res = sqlx::query("delete from templates where project = ?1 and name = ?2")
        .bind(project)
        .bind(name)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::not_found(format!("template {project}/{name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn put_get_list_delete_round_trip() {
        let pool = memory_pool().await;
        put(&pool, "proj", "readme", &serde_json::json!({"title": "hi"}))
            .await
            .unwrap();

        let got = get(&pool, "proj", "readme").await.unwrap();
        assert_eq!(got.data["title"], "hi");

        assert_eq!(list(&pool, "proj").await.unwrap().len(), 1);

        delete(&pool, "proj", "readme").await.unwrap();
        assert!(get(&pool, "proj", "readme").await.is_err());
    }
}
