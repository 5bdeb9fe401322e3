//! larder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use larder_core::config::{AppConfig, PrivateKeyConfig, SigningConfig};
use larder_server::{AppState, create_router};
use larder_signer::CertificateSigner;
use larder_store::load_snapshot;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// larder - a certified asset store
#[derive(Parser, Debug)]
#[command(name = "larderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LARDER_CONFIG",
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

    tracing::info!("larder v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    for warning in config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?
    {
        tracing::warn!("Configuration warning: {}", warning);
    }

    larder_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let signer = load_signer(&config.signing).await?;

    let snapshot = match &config.store.snapshot_path {
        Some(path) => {
            let snapshot = load_snapshot(path)
                .await
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
            if snapshot.is_none() {
                tracing::info!(path = %path.display(), "No snapshot found, starting empty");
            }
            snapshot
        }
        None => {
            tracing::warn!("store.snapshot_path not set, state will not survive a restart");
            None
        }
    };

    let state = AppState::new(config.clone(), signer, snapshot).context("failed to build depot")?;
    larder_server::metrics::observe_depot(&*state.depot.read().await);

    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        let guard = state.guard.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                interval.tick().await;
                guard.cleanup(cleanup_interval);
            }
        });
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    if config.store.snapshot_path.is_some() {
        let state = state.clone();
        let period = config.store.snapshot_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = state.save_snapshot().await {
                    tracing::error!(error = %e, "Periodic snapshot failed");
                }
            }
        });
        tracing::info!(
            interval_secs = config.store.snapshot_interval_secs,
            "Snapshot task spawned"
        );
    }

    if config.store.batch_cleanup_enabled {
        let state = state.clone();
        let period = config.store.batch_cleanup_interval();
        let ttl = config.store.batch_ttl();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                purge_stale_batches(&state, ttl).await;
            }
        });
        tracing::info!(
            interval_secs = config.store.batch_cleanup_interval_secs,
            ttl_secs = config.store.batch_ttl_secs,
            "Stale batch cleanup task spawned"
        );
    } else {
        tracing::info!("Stale batch cleanup disabled");
    }

    let app = create_router(state.clone());

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if state
        .save_snapshot()
        .await
        .context("failed to save snapshot on shutdown")?
    {
        tracing::info!("Final snapshot saved");
    }
    Ok(())
}

/// Load configuration from an optional TOML file plus `LARDER_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!("No config file found at {}, using defaults and environment", path);
    }

    figment
        .merge(Env::prefixed("LARDER_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Drop upload batches idle for longer than `ttl`.
async fn purge_stale_batches(state: &AppState, ttl: time::Duration) -> usize {
    let cutoff = OffsetDateTime::now_utc() - ttl;
    let mut depot = state.depot.write().await;
    let removed = depot.delete_stale_batches(cutoff);
    larder_server::metrics::STALE_BATCHES_PURGED.inc_by(removed as u64);
    larder_server::metrics::observe_depot(&depot);
    removed
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Load the certificate signer from configuration.
async fn load_signer(config: &SigningConfig) -> Result<CertificateSigner> {
    match &config.private_key {
        PrivateKeyConfig::File { path } => {
            let key_data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read key file: {}", path.display()))?;
            let signer = CertificateSigner::from_secret_key(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Env { var } => {
            let key_data = std::env::var(var)
                .with_context(|| format!("signing key env var not set: {var}"))?;
            let signer = CertificateSigner::from_secret_key(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key from env: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Generate => {
            tracing::warn!("Generating ephemeral signing key (not suitable for production)");
            let signer = CertificateSigner::generate(&config.key_name);
            tracing::info!("Generated signing key: {}", signer.key_name());
            tracing::info!("Public key: {}", signer.public_key_string());
            Ok(signer)
        }
        PrivateKeyConfig::Value { key } => {
            tracing::warn!("Using inline signing key (not recommended for production)");
            let signer = CertificateSigner::from_secret_key(key.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
    }
}
