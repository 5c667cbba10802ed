//! Webhook dispatcher (spec.md §4.11): subscribes `*` on the bus, fans
//! matching events out to registered URLs, HMAC-signs the body when a
//! secret is configured, and auto-disables a webhook after repeated
//! failures.

use glob::Pattern;
use hmac::{Hmac, Mac};
use koor_bus::Bus;
use koor_schemas::{Result, Webhook};
use sha2::Sha256;
use sqlx::SqlitePool;

/// `fail_count` at which a webhook is auto-disabled (spec.md §4.11).
pub const AUTO_DISABLE_AT: i64 = 10;

type HmacSha256 = Hmac<Sha256>;

pub async fn create(
    pool: &SqlitePool,
    url: &str,
    patterns: &[String],
    secret: Option<&str>,
) -> Result<Webhook> {
    koor_db::webhooks::create(pool, url, patterns, secret).await
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Webhook>> {
    koor_db::webhooks::list(pool).await
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Webhook> {
    koor_db::webhooks::get(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    koor_db::webhooks::delete(pool, id).await
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// One delivery attempt. Builds the body independently of `koor_db::events`
/// so `TestFire` can construct a synthetic event without persisting one.
async fn deliver(client: &reqwest::Client, webhook: &Webhook, body_json: &serde_json::Value) -> bool {
    let body = serde_json::to_vec(body_json).unwrap_or_default();
    let mut req = client
        .post(&webhook.url)
        .header("Content-Type", "application/json")
        .header("X-Koor-Event", "true");
    if let Some(secret) = &webhook.secret {
        req = req.header("X-Koor-Signature", sign(secret, &body));
    }

    match req.body(body).send().await {
        Ok(resp) => resp.status().as_u16() < 400,
        Err(e) => {
            tracing::debug!(webhook_id = webhook.id, error = %e, "webhook delivery transport error");
            false
        }
    }
}

async fn dispatch_to_matching(pool: &SqlitePool, client: &reqwest::Client, event: &koor_schemas::Event) -> Result<()> {
    let webhooks = koor_db::webhooks::list_active(pool).await?;
    let body = serde_json::json!({
        "topic": event.topic,
        "data": event.data,
        "source": event.source,
        "event_id": event.id,
        "created_at": event.created_at,
    });

    for webhook in webhooks {
        let matches = webhook.patterns.iter().any(|p| {
            Pattern::new(p).map(|pat| pat.matches(&event.topic)).unwrap_or(false)
        });
        if !matches {
            continue;
        }

        if deliver(client, &webhook, &body).await {
            koor_db::webhooks::record_success(pool, webhook.id).await?;
        } else {
            let disabled = koor_db::webhooks::record_failure(pool, webhook.id, AUTO_DISABLE_AT).await?;
            if disabled {
                tracing::warn!(webhook_id = webhook.id, "webhook auto-disabled after repeated failures");
            }
        }
    }
    Ok(())
}

/// Synchronously sends a `webhook.test` payload to one webhook
/// (spec.md §4.11 `TestFire`), bypassing the bus and pattern filter.
pub async fn test_fire(pool: &SqlitePool, client: &reqwest::Client, id: i64) -> Result<bool> {
    let webhook = koor_db::webhooks::get(pool, id).await?;
    let body = serde_json::json!({
        "topic": "webhook.test",
        "data": {"webhook_id": id, "test": true},
        "source": "koor",
    });
    let ok = deliver(client, &webhook, &body).await;
    if ok {
        koor_db::webhooks::record_success(pool, id).await?;
    } else {
        koor_db::webhooks::record_failure(pool, id, AUTO_DISABLE_AT).await?;
    }
    Ok(ok)
}

/// Subscribes `*` on the bus and spawns the dispatcher's consumer loop
/// (spec.md §4.11 `Start`).
pub fn spawn_dispatcher(pool: SqlitePool, bus: Bus, timeout: std::time::Duration) {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to build webhook http client, dispatcher not started");
                return;
            }
        };

        let (_id, mut rx) = match bus.subscribe("*").await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "webhook dispatcher failed to subscribe");
                return;
            }
        };

        while let Some(event) = rx.recv().await {
            if let Err(e) = dispatch_to_matching(&pool, &client, &event).await {
                tracing::warn!(error = %e, "webhook dispatch failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let sig_a = sign("secret", b"body");
        let sig_b = sign("secret", b"body");
        assert_eq!(sig_a, sig_b);
        assert_eq!(sig_a.len(), 64);
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        assert_ne!(sign("a", b"body"), sign("b", b"body"));
    }

    #[tokio::test]
    async fn create_list_delete_round_trip() {
        let pool = koor_db::connect("sqlite::memory:").await.unwrap();
        koor_db::migrate(&pool).await.unwrap();

        let hook = create(&pool, "https://example.com/hook", &["agent.*".to_string()], None)
            .await
            .unwrap();
        assert_eq!(list(&pool).await.unwrap().len(), 1);
        delete(&pool, hook.id).await.unwrap();
        assert!(list(&pool).await.unwrap().is_empty());
    }
}
