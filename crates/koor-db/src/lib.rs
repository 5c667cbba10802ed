//! Persistence layer (spec.md §4.1): connection setup, migrations, and the
//! per-domain row CRUD every higher-level Koor crate builds its logic on.
//!
//! This crate owns the pool, the migrations, and every table's raw row
//! operations; pure domain logic (diff, glob matching, rule dispatch,
//! liveness sweeps) lives one layer up, in `koor-state`/`koor-bus`/etc.

use koor_schemas::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

pub mod audit;
pub mod compliance;
pub mod events;
pub mod instances;
pub mod metrics;
pub mod rules;
pub mod specs;
pub mod state;
pub mod templates;
pub mod webhooks;

pub const ENV_DB_URL: &str = "KOOR_DATABASE_URL";

/// Default deadline for a single persistence call (spec.md §4.1: "a
/// deadline"; §5: a timed-out call surfaces as an error, never a hang).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// SQLite's single-writer busy-wait. spec.md §4.1 requires a per-connection
/// busy-wait with a floor of 5s when a writer is contended.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `url` (a `sqlite://` DSN), creating the database file if it
/// doesn't exist yet.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .map_err(|e| Error::Internal(format!("bad sqlite url {url}: {e}")))?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .map_err(|e| Error::Internal(format!("failed to connect to sqlite: {e}")))
}

pub async fn connect_from_env() -> Result<SqlitePool> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| Error::Internal(format!("missing env var {ENV_DB_URL}")))?;
    connect(&url).await
}

/// Run embedded migrations. Additive-only schema (spec.md §4.1): rerunning
/// on a live database is a no-op, sqlx tracks which files already applied.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::memory_pool;
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn connects_to_in_memory_sqlite() {
        let pool = memory_pool().await;
        let (one,): (i64,) = sqlx::query_as("select 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }
}
