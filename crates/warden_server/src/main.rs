//! Warden server.
//!
//! HTTP API for the capability-gated WASM execution sandbox.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use warden_core::WardenConfig;
use warden_server::{api, build_service};

#[derive(Parser)]
#[command(name = "warden-server")]
#[command(about = "Capability-gated WASM execution sandbox", long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:8787")]
    bind: String,

    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<WardenConfig> {
    let Some(path) = path else {
        return Ok(WardenConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = WardenConfig::from_toml_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug,tower_http=debug".into()),
        )
        .init();

    let config = load_config(args.config.as_ref())?;
    tracing::info!(
        frozen = config.frozen,
        canary_fraction = config.canary_fraction,
        "warden starting"
    );

    let service = build_service(config);
    let router = api::router(service);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(bind = %args.bind, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
