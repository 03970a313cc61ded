//! formstash server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use formstash_core::AppConfig;
use formstash_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// formstash - multipart form decoding server
#[derive(Parser, Debug)]
#[command(name = "formstashd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "FORMSTASH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("formstash v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; env vars can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("FORMSTASH_") && key != "FORMSTASH_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: formstashd --config /path/to/config.toml\n  \
             2. Environment variables: FORMSTASH_SERVER__BIND=0.0.0.0:8080 formstashd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set FORMSTASH_CONFIG env var to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FORMSTASH_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    formstash_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let state = AppState::new(config.clone());

    // Refuse to start with an unusable temp directory.
    state
        .store
        .health_check()
        .await
        .with_context(|| format!("temp directory {} is unusable", state.store.dir().display()))?;
    tracing::info!(
        temp_dir = %state.store.dir().display(),
        routes = state.routes.len(),
        "Multipart decoder ready"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
