//! Splice server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use splice_core::config::AppConfig;
use splice_server::{AppState, create_router, spawn_sweeper};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Splice - chunked upload assembler
#[derive(Parser, Debug)]
#[command(name = "spliced")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SPLICE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `SPLICE_` env vars.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(config_path).exists() {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::info!(
            config_path = %config_path,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SPLICE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config.validate().context("invalid configuration")?;
    Ok(config)
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

    tracing::info!("Splice v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    splice_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let staging = splice_storage::staging_from_config(&config.staging)
        .await
        .context("failed to initialize staging")?;
    staging
        .health_check()
        .await
        .context("staging health check failed")?;
    tracing::info!(path = %config.staging.path.display(), "Staging initialized");

    let objects = splice_storage::object_store_from_config(&config.storage)
        .await
        .context("failed to initialize object store")?;

    // Catch misconfiguration before accepting fragments that could never be published.
    objects
        .health_check()
        .await
        .context("object store health check failed")?;
    tracing::info!(
        backend = objects.backend_name(),
        "Object store connectivity verified"
    );

    let _sweeper = spawn_sweeper(
        staging.clone(),
        config.staging.sweep_interval(),
        config.staging.retention(),
    );
    tracing::info!(
        interval_secs = config.staging.sweep_interval_secs,
        retention_secs = config.staging.retention_secs,
        "Staging sweeper spawned"
    );

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, staging, objects);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            format!(
                r#"
[server]
bind = "0.0.0.0:9090"
metrics_enabled = false

[staging]
path = "{}"
retention_secs = 120

[storage]
type = "filesystem"
path = "{}"
"#,
                dir.path().join("staging").display(),
                dir.path().join("objects").display(),
            ),
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert!(!config.server.metrics_enabled);
        assert_eq!(config.staging.retention_secs, 120);
        assert_eq!(config.storage.key_prefix(), "uploads");
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[staging]\nretention_secs = 0\n").unwrap();

        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("retention_secs"));
    }
}
