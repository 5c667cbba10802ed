//! Boundary configuration: bind address, data directory, bearer token, log
//! level, event-bus history cap, liveness/compliance ticker intervals.
//!
//! An optional YAML file is loaded first (if present), then every field can
//! be overridden by an environment variable. Nothing here is business
//! logic — it is read once at daemon/CLI startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KoorConfig {
    #[serde(default = "default_bind")]
    pub bind_addr: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_history_cap")]
    pub event_history_cap: i64,
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    #[serde(default = "default_compliance_interval_secs")]
    pub compliance_interval_secs: u64,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8420".to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_history_cap() -> i64 {
    1000
}
fn default_liveness_interval_secs() -> u64 {
    60
}
fn default_stale_after_secs() -> i64 {
    300
}
fn default_compliance_interval_secs() -> u64 {
    300
}
fn default_webhook_timeout_secs() -> u64 {
    10
}

impl Default for KoorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind(),
            data_dir: default_data_dir(),
            bearer_token: None,
            log_level: default_log_level(),
            event_history_cap: default_history_cap(),
            liveness_interval_secs: default_liveness_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            compliance_interval_secs: default_compliance_interval_secs(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

impl KoorConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn compliance_interval(&self) -> Duration {
        Duration::from_secs(self.compliance_interval_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn sqlite_url(&self) -> String {
        std::env::var("KOOR_DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/koor.db?mode=rwc", self.data_dir))
    }

    /// Load an optional YAML file, then apply env var overrides
    /// (`KOOR_BIND_ADDR`, `KOOR_DATA_DIR`, `KOOR_BEARER_TOKEN`,
    /// `KOOR_LOG_LEVEL`, `KOOR_EVENT_HISTORY_CAP`,
    /// `KOOR_LIVENESS_INTERVAL_SECS`, `KOOR_STALE_AFTER_SECS`,
    /// `KOOR_COMPLIANCE_INTERVAL_SECS`, `KOOR_WEBHOOK_TIMEOUT_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) if std::path::Path::new(p).exists() => {
                let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
                let yaml_val: serde_yaml::Value =
                    serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
                let json_val =
                    serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
                serde_json::from_value(json_val).context("config shape mismatch")?
            }
            _ => KoorConfig::default(),
        };

        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    /// Canonical JSON (sorted keys) + its sha256, used for the daemon's
    /// startup log line so operators can confirm which config is live.
    pub fn canonical_hash(&self) -> Result<(String, String)> {
        let raw = serde_json::to_value(self).context("serialize config")?;
        let sorted = sort_keys(&raw);
        let canonical = serde_json::to_string(&sorted).context("stringify config")?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok((canonical, hex::encode(hasher.finalize())))
    }
}

fn apply_env_overrides(cfg: &mut KoorConfig) {
    if let Ok(v) = std::env::var("KOOR_BIND_ADDR") {
        cfg.bind_addr = v;
    }
    if let Ok(v) = std::env::var("KOOR_DATA_DIR") {
        cfg.data_dir = v;
    }
    if let Ok(v) = std::env::var("KOOR_BEARER_TOKEN") {
        cfg.bearer_token = Some(v);
    }
    if let Ok(v) = std::env::var("KOOR_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = std::env::var("KOOR_EVENT_HISTORY_CAP").ok().and_then(|s| s.parse().ok()) {
        cfg.event_history_cap = v;
    }
    if let Some(v) = std::env::var("KOOR_LIVENESS_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        cfg.liveness_interval_secs = v;
    }
    if let Some(v) = std::env::var("KOOR_STALE_AFTER_SECS").ok().and_then(|s| s.parse().ok()) {
        cfg.stale_after_secs = v;
    }
    if let Some(v) = std::env::var("KOOR_COMPLIANCE_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        cfg.compliance_interval_secs = v;
    }
    if let Some(v) = std::env::var("KOOR_WEBHOOK_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        cfg.webhook_timeout_secs = v;
    }
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
