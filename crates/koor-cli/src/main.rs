use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use koor_config::KoorConfig;
use koor_daemon::{routes, state::AppState};

#[derive(Parser)]
#[command(name = "koor")]
#[command(about = "Koor coordination server", long_about = None)]
struct Cli {
    /// Path to an optional YAML config file (env vars still override).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the daemon in-process: connect, migrate, serve HTTP.
    Serve,
    /// Apply pending migrations against KOOR_DATABASE_URL and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Serve => serve(cli.config.as_deref()).await,
        Commands::Migrate => migrate().await,
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = KoorConfig::load(config_path).context("load koor configuration")?;
    init_tracing(&config.log_level);

    let pool = koor_db::connect(&config.sqlite_url())
        .await
        .context("connect to sqlite")?;
    koor_db::migrate(&pool).await.context("run migrations")?;

    let bind_addr = config.bind_addr.clone();
    let shared = Arc::new(AppState::new(pool, config));
    shared.spawn_background_tasks();

    let app = routes::build_router(shared);
    tracing::info!("koor-cli: serving on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    axum::serve(listener, app).await.context("server crashed")
}

async fn migrate() -> Result<()> {
    let pool = koor_db::connect_from_env().await.context("connect to sqlite")?;
    koor_db::migrate(&pool).await.context("run migrations")?;
    println!("migrations_applied=true");
    Ok(())
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()),
        )
        .init();
}
