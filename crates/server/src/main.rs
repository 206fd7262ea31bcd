//! stowaged: content-addressed archive ingestion and remote migration.

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_server::notify::LogSink;
use stowage_server::routes::create_router;
use stowage_server::state::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stowaged", about = "Content-addressed archive storage daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "STOWAGE_CONFIG", default_value = "stowage.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("STOWAGE_").split("__"))
        .extract()
        .context("loading configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let state = AppState::build(config, Arc::new(LogSink)).await?;
    let _gc_tasks = state.gc.spawn();

    let listener = tokio::net::TcpListener::bind(&state.config.server.bind)
        .await
        .with_context(|| format!("binding {}", state.config.server.bind))?;
    tracing::info!(bind = %state.config.server.bind, "stowaged listening");

    let app = create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
