//! Spec registry (spec.md §4.3): versioned project specification blobs,
//! one hop above `koor_db::specs`'s raw rows — this crate owns the content
//! hash so callers never have to compute it themselves.

use koor_schemas::{Result, Spec, SpecSummary};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

pub async fn put(pool: &SqlitePool, project: &str, name: &str, data: &[u8]) -> Result<Spec> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash = hex::encode(hasher.finalize());
    koor_db::specs::put(pool, project, name, data, &hash).await
}

pub async fn get(pool: &SqlitePool, project: &str, name: &str) -> Result<Spec> {
    koor_db::specs::get(pool, project, name).await
}

pub async fn list(pool: &SqlitePool, project: &str) -> Result<Vec<SpecSummary>> {
    koor_db::specs::list(pool, project).await
}

pub async fn delete(pool: &SqlitePool, project: &str, name: &str) -> Result<()> {
    koor_db::specs::delete(pool, project, name).await
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
    async fn put_bumps_version_and_hash() {
        let pool = memory_pool().await;
        let first = put(&pool, "proj", "api", b"{}").await.unwrap();
        let second = put(&pool, "proj", "api", b"{\"v\":1}").await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_ne!(first.hash, second.hash);
    }
}
