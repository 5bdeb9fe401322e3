//! Application state shared across handlers.

use larder_core::Caller;
use larder_core::config::AppConfig;
use larder_signer::CertificateSigner;
use larder_store::{
    ControllerGuard, Depot, DepotConfig, DepotSnapshot, StoreResult, save_snapshot,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

/// Shared application state.
///
/// The depot sits behind one `RwLock`: mutating calls take the write lock and
/// run one at a time, reads share the read lock.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    pub depot: Arc<RwLock<Depot>>,
    /// Controllers keyed by the SHA256 hex of their bearer token.
    pub controllers: Arc<HashMap<String, Caller>>,
    pub signer: Arc<CertificateSigner>,
    /// Access guard handed to the depot; kept here for rate limit cleanup.
    pub guard: Arc<ControllerGuard>,
    /// Caps chunk uploads in flight.
    pub upload_permits: Arc<Semaphore>,
}

impl AppState {
    /// Create the state, restoring the depot from `snapshot` when given.
    pub fn new(
        config: AppConfig,
        signer: CertificateSigner,
        snapshot: Option<DepotSnapshot>,
    ) -> StoreResult<Self> {
        let signer = Arc::new(signer);
        let guard = Arc::new(ControllerGuard::new(&config.rate_limit));
        let depot_config = DepotConfig::from_app_config(&config);

        let depot = match snapshot {
            Some(snapshot) => Depot::restore(depot_config, guard.clone(), signer.clone(), snapshot)?,
            None => Depot::new(depot_config, guard.clone(), signer.clone())?,
        };

        let controllers = config
            .controllers
            .iter()
            .map(|c| {
                (
                    c.token_hash.to_ascii_lowercase(),
                    Caller::controller(c.caller.clone(), c.scope),
                )
            })
            .collect();

        Ok(Self {
            upload_permits: Arc::new(Semaphore::new(config.server.max_parallel_chunks.max(1) as usize)),
            config: Arc::new(config),
            depot: Arc::new(RwLock::new(depot)),
            controllers: Arc::new(controllers),
            signer,
            guard,
        })
    }

    /// Get the cleanup interval for rate limiter, if enabled.
    /// A zero interval from config falls back to 60 seconds, since
    /// `tokio::time::interval` panics on zero.
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if !self.config.rate_limit.enabled {
            return None;
        }
        let ttl_secs = self.config.rate_limit.entry_ttl_secs;
        if ttl_secs == 0 {
            tracing::warn!("rate_limit.entry_ttl_secs is 0, using default of 60 seconds");
            Some(Duration::from_secs(60))
        } else {
            Some(Duration::from_secs(ttl_secs))
        }
    }

    /// Write a snapshot to the configured path. Returns `false` when snapshots are disabled.
    pub async fn save_snapshot(&self) -> StoreResult<bool> {
        let Some(path) = self.config.store.snapshot_path.as_deref() else {
            return Ok(false);
        };
        let snapshot = self.depot.read().await.snapshot();
        save_snapshot(path, &snapshot).await?;
        crate::metrics::SNAPSHOTS_SAVED.inc();
        Ok(true)
    }
}
