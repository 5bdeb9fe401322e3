//! Access gate consulted by every mutating entry point.
//!
//! The guard answers one question: may this caller run this kind of operation
//! right now? Collection rules (read/write permissions, ownership) are checked
//! later by the components that know the target asset.

use crate::error::{StoreError, StoreResult};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use larder_core::config::RateLimitConfig;
use larder_core::{Caller, Scope};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

/// Per-caller keyed limiter.
type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Kinds of mutating operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Batch init, chunk upload and commit. Collection rules decide the rest.
    Upload,
    /// Proposal lifecycle and staged data cleanup.
    Proposal,
    /// Single asset deletes. Collection rules decide the rest.
    DeleteAsset,
    /// Bulk, filtered and multi asset deletes.
    DeleteAssets,
    /// Collection rules.
    Rules,
    /// Custom domain registry.
    Domains,
}

impl Operation {
    /// The scope a caller needs, if any.
    pub fn required_scope(&self) -> Option<Scope> {
        match self {
            Self::Upload | Self::DeleteAsset => None,
            Self::Proposal | Self::DeleteAssets => Some(Scope::Write),
            Self::Rules | Self::Domains => Some(Scope::Admin),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Proposal => "proposal",
            Self::DeleteAsset => "delete_asset",
            Self::DeleteAssets => "delete_assets",
            Self::Rules => "rules",
            Self::Domains => "domains",
        }
    }
}

/// Pass/fail gate on mutating calls.
pub trait AccessGuard: Send + Sync {
    /// Check a caller before any business logic runs.
    fn check(&self, caller: &Caller, operation: Operation) -> StoreResult<()>;
}

/// Guard that admits everyone. Used by tests and embedded setups.
pub struct AllowAll;

impl AccessGuard for AllowAll {
    fn check(&self, _caller: &Caller, _operation: Operation) -> StoreResult<()> {
        Ok(())
    }
}

/// Default guard: controller scopes plus a per-caller rate limit.
pub struct ControllerGuard {
    limiter: Option<KeyedLimiter>,
    last_seen: DashMap<String, Instant>,
}

impl ControllerGuard {
    /// Create a guard from the rate limit configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = config.enabled.then(|| {
            let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
            let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
            RateLimiter::dashmap(Quota::per_minute(per_minute).allow_burst(burst))
        });
        Self {
            limiter,
            last_seen: DashMap::new(),
        }
    }

    /// Guard that only checks scopes.
    pub fn unlimited() -> Self {
        Self {
            limiter: None,
            last_seen: DashMap::new(),
        }
    }

    /// Forget callers idle for longer than `ttl`. Returns the number evicted.
    pub fn cleanup(&self, ttl: Duration) -> usize {
        let Some(limiter) = &self.limiter else {
            return 0;
        };
        let before = self.last_seen.len();
        self.last_seen.retain(|_, seen| seen.elapsed() < ttl);
        let evicted = before.saturating_sub(self.last_seen.len());
        if evicted > 0 {
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracing::debug!(evicted, "Evicted idle rate limit entries");
        }
        evicted
    }

    fn check_rate(&self, caller: &Caller) -> StoreResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let key = caller.id.as_str().to_string();
        self.last_seen.insert(key.clone(), Instant::now());
        limiter.check_key(&key).map_err(|_| {
            tracing::warn!(caller = %key, "Caller exceeded rate limit");
            StoreError::RateLimited(key)
        })
    }
}

impl AccessGuard for ControllerGuard {
    fn check(&self, caller: &Caller, operation: Operation) -> StoreResult<()> {
        self.check_rate(caller)?;

        if let Some(scope) = operation.required_scope()
            && !caller.has_scope(scope)
        {
            return Err(StoreError::PermissionDenied(format!(
                "{} requires {} scope",
                operation.as_str(),
                scope.as_str()
            )));
        }
        Ok(())
    }
}
