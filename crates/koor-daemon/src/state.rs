//! Shared runtime state for koor-daemon.
//!
//! All handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself beyond the pool and bus, which are already
//! internally synchronized.

use koor_bus::Bus;
use koor_config::KoorConfig;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub bus: Bus,
    pub config: Arc<KoorConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: KoorConfig) -> Self {
        let bus = Bus::new(pool.clone());
        let http = reqwest::Client::builder()
            .timeout(config.webhook_timeout())
            .build()
            .expect("webhook http client builds with a static timeout");
        Self {
            pool,
            bus,
            config: Arc::new(config),
            http,
        }
    }

    /// Spawns every periodic task the daemon owns: liveness sweep,
    /// compliance scheduler, event pruner, webhook dispatcher.
    pub fn spawn_background_tasks(&self) {
        koor_instances::spawn_liveness_monitor(
            self.pool.clone(),
            self.bus.clone(),
            self.config.liveness_interval(),
            chrono::Duration::seconds(self.config.stale_after_secs),
        );
        koor_compliance::spawn_scheduler(
            self.pool.clone(),
            self.bus.clone(),
            self.config.compliance_interval(),
        );
        koor_bus::spawn_pruner(
            self.bus.clone(),
            self.config.liveness_interval(),
            self.config.event_history_cap,
        );
        koor_webhooks::spawn_dispatcher(self.pool.clone(), self.bus.clone(), self.config.webhook_timeout());
    }
}
