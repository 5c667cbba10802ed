//! Versioned key/value store (spec.md §4.2): every `Put` keeps the previous
//! version in `state_history`, `Rollback` replays an old version forward as
//! a new one, and `Diff` walks two JSON trees structurally rather than
//! comparing serialized bytes.

use koor_schemas::{DiffEntry, DiffKind, Error, HistoryEntry, Result, StateEntry, StateSummary};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

fn hash_of(value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value);
    hex::encode(hasher.finalize())
}

pub async fn put(
    pool: &SqlitePool,
    key: &str,
    value: &[u8],
    content_type: &str,
    updated_by: &str,
) -> Result<StateEntry> {
    let hash = hash_of(value);
    koor_db::state::put(pool, key, value, &hash, content_type, updated_by).await
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<StateEntry> {
    koor_db::state::get(pool, key).await
}

pub async fn list(pool: &SqlitePool, prefix: &str) -> Result<Vec<StateSummary>> {
    koor_db::state::list(pool, prefix).await
}

pub async fn delete(pool: &SqlitePool, key: &str) -> Result<()> {
    koor_db::state::delete(pool, key).await
}

pub async fn history(pool: &SqlitePool, key: &str) -> Result<Vec<HistoryEntry>> {
    let rows = koor_db::state::history(pool, key).await?;
    Ok(rows
        .into_iter()
        .map(|e| HistoryEntry {
            key: e.key,
            value: e.value,
            version: e.version,
            hash: e.hash,
            content_type: e.content_type,
            updated_at: e.updated_at,
            updated_by: e.updated_by,
        })
        .collect())
}

pub async fn get_version(pool: &SqlitePool, key: &str, version: i64) -> Result<StateEntry> {
    koor_db::state::get_version(pool, key, version).await
}

/// Writes `version`'s value back as a brand-new version (spec.md §4.2:
/// rollback is forward-only, it never deletes history).
pub async fn rollback(pool: &SqlitePool, key: &str, version: i64, updated_by: &str) -> Result<StateEntry> {
    let target = get_version(pool, key, version).await?;
    put(pool, key, &target.value, &target.content_type, updated_by).await
}

/// Structurally diffs two JSON documents, producing one `DiffEntry` per
/// changed/added/removed leaf or array element. Object keys are walked in
/// their serialized order; array indices align positionally.
pub fn diff(old: &Value, new: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_at("", old, new, &mut out);
    out
}

fn diff_at(path: &str, old: &Value, new: &Value, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (k, old_v) in old_map {
                let child_path = join(path, k);
                match new_map.get(k) {
                    Some(new_v) => diff_at(&child_path, old_v, new_v, out),
                    None => out.push(DiffEntry {
                        path: child_path,
                        kind: DiffKind::Removed,
                        old: Some(old_v.clone()),
                        new: None,
                    }),
                }
            }
            for (k, new_v) in new_map {
                if !old_map.contains_key(k) {
                    out.push(DiffEntry {
                        path: join(path, k),
                        kind: DiffKind::Added,
                        old: None,
                        new: Some(new_v.clone()),
                    });
                }
            }
        }
        (Value::Array(old_arr), Value::Array(new_arr)) => {
            let max = old_arr.len().max(new_arr.len());
            for i in 0..max {
                let child_path = format!("{path}[{i}]");
                match (old_arr.get(i), new_arr.get(i)) {
                    (Some(o), Some(n)) => diff_at(&child_path, o, n, out),
                    (Some(o), None) => out.push(DiffEntry {
                        path: child_path,
                        kind: DiffKind::Removed,
                        old: Some(o.clone()),
                        new: None,
                    }),
                    (None, Some(n)) => out.push(DiffEntry {
                        path: child_path,
                        kind: DiffKind::Added,
                        old: None,
                        new: Some(n.clone()),
                    }),
                    (None, None) => unreachable!(),
                }
            }
        }
        (o, n) => {
            if o != n {
                out.push(DiffEntry {
                    path: path.to_string(),
                    kind: DiffKind::Changed,
                    old: Some(o.clone()),
                    new: Some(n.clone()),
                });
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Convenience: diff between two stored versions of the same key, parsing
/// both as JSON. Returns `Error::InvalidInput` if either version isn't JSON
/// (diffing opaque blobs isn't meaningful).
pub async fn diff_versions(
    pool: &SqlitePool,
    key: &str,
    from: i64,
    to: i64,
) -> Result<Vec<DiffEntry>> {
    let old = get_version(pool, key, from).await?;
    let new = get_version(pool, key, to).await?;
    let old_json: Value = serde_json::from_slice(&old.value)
        .map_err(|e| Error::InvalidInput(format!("version {from} is not json: {e}")))?;
    let new_json: Value = serde_json::from_slice(&new.value)
        .map_err(|e| Error::InvalidInput(format!("version {to} is not json: {e}")))?;
    Ok(diff(&old_json, &new_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        let pool = koor_db::connect("sqlite::memory:").await.unwrap();
        koor_db::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn put_get_history_rollback() {
        let pool = memory_pool().await;
        put(&pool, "k", b"{\"a\":1}", "application/json", "u").await.unwrap();
        put(&pool, "k", b"{\"a\":2}", "application/json", "u").await.unwrap();

        let current = get(&pool, "k").await.unwrap();
        assert_eq!(current.version, 2);

        let rolled = rollback(&pool, "k", 1, "u").await.unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.value, b"{\"a\":1}");

        assert_eq!(history(&pool, "k").await.unwrap().len(), 3);
    }

    #[test]
    fn diff_detects_added_removed_changed() {
        let old = json!({"a": 1, "b": {"c": 2}, "arr": [1, 2]});
        let new = json!({"a": 1, "b": {"c": 3}, "d": true, "arr": [1]});

        let entries = diff(&old, &new);
        let kinds: Vec<_> = entries.iter().map(|e| (e.path.clone(), e.kind)).collect();

        assert!(kinds.contains(&("b.c".to_string(), DiffKind::Changed)));
        assert!(kinds.contains(&("d".to_string(), DiffKind::Added)));
        assert!(kinds.contains(&("arr[1]".to_string(), DiffKind::Removed)));
    }

    #[tokio::test]
    async fn diff_versions_rejects_non_json_blobs() {
        let pool = memory_pool().await;
        put(&pool, "k", b"not json", "text/plain", "u").await.unwrap();
        put(&pool, "k", b"also not json", "text/plain", "u").await.unwrap();
        assert!(diff_versions(&pool, "k", 1, 2).await.is_err());
    }
}
