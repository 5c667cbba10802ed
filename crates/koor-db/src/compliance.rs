//! `compliance_runs` row access (spec.md §4.10).

use chrono::Utc;
use koor_schemas::{ComplianceRun, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn insert(
    pool: &SqlitePool,
    instance_id: Uuid,
    project: &str,
    contract_name: &str,
    pass: bool,
    violations: &serde_json::Value,
) -> Result<ComplianceRun> {
    let now = Utc::now();
    let violations_text = serde_json::to_string(violations)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        insert into compliance_runs
            (instance_id, project, contract_name, pass, violations, run_at)
        values (?1, ?2, ?3, ?4, ?5, ?6)
        returning id
        "#,
    )
    .bind(instance_id.to_string())
    .bind(project)
    .bind(contract_name)
    .bind(pass)
    .bind(&violations_text)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(ComplianceRun {
        id,
        instance_id,
        project: project.to_string(),
        contract_name: contract_name.to_string(),
        pass,
        violations: violations.clone(),
        run_at: now,
    })
}

pub async fn list_for_instance(pool: &SqlitePool, instance_id: Uuid) -> Result<Vec<ComplianceRun>> {
    let rows = sqlx::query(
        r#"
        select id, instance_id, project, contract_name, pass, violations, run_at
        from compliance_runs
        where instance_id = ?1
        order by run_at desc
        "#,
    )
    .bind(instance_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let violations_text: String = row.try_get("violations")?;
        let instance_id_text: String = row.try_get("instance_id")?;
        out.push(ComplianceRun {
            id: row.try_get("id")?,
            instance_id: instance_id_text
                .parse()
                .map_err(|_| koor_schemas::Error::Internal("corrupt instance id".to_string()))?,
            project: row.try_get("project")?,
            contract_name: row.try_get("contract_name")?,
            pass: row.try_get("pass")?,
            violations: serde_json::from_str(&violations_text)?,
            run_at: row.try_get("run_at")?,
        });
    }
    Ok(out)
}
