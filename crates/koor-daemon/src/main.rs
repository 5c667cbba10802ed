//! koor-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! state, wires middleware, and starts the HTTP server. All route handlers
//! live in `routes.rs`; all shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use koor_config::KoorConfig;
use koor_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let config = KoorConfig::load(None).context("load koor configuration")?;
    init_tracing(&config.log_level);

    let pool = koor_db::connect(&config.sqlite_url())
        .await
        .context("connect to sqlite")?;
    koor_db::migrate(&pool).await.context("run migrations")?;

    let bind_addr = config.bind_addr.clone();
    let shared = Arc::new(state::AppState::new(pool, config));
    shared.spawn_background_tasks();

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(open_cors());

    info!("koor-daemon listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    axum::serve(listener, app).await.context("server crashed")?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .init();
}

/// Koor's gate is the bearer-token middleware in `routes.rs`, not CORS — the
/// daemon is meant to be reachable by any agent process on the host, so
/// this permits any origin rather than a localhost allowlist.
fn open_cors() -> CorsLayer {
    CorsLayer::permissive()
}
