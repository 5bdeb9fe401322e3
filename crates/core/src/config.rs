//! Configuration types shared across crates.

use crate::access::Scope;
use crate::asset::HeaderField;
use crate::collection::{SetRule, validate_collection_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of one uploaded chunk in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Chunk bodies read concurrently; also the parallelism advertised to clients.
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: u32,
    /// Size of each streamed slice of a large response body.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// Restrict it to the scraper network at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_parallel_chunks() -> u32 {
    crate::DEFAULT_PARALLEL_CHUNKS
}

fn default_stream_chunk_size() -> u64 {
    crate::STREAM_CHUNK_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            max_parallel_chunks: default_max_parallel_chunks(),
            stream_chunk_size: default_stream_chunk_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 || self.stream_chunk_size == 0 {
            return Err("server.max_chunk_size and server.stream_chunk_size must be > 0".to_string());
        }
        if self.max_parallel_chunks == 0 {
            return Err("server.max_parallel_chunks must be > 0".to_string());
        }
        Ok(())
    }
}

/// Store persistence and housekeeping configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file. When unset, state lives in memory only.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Interval between periodic snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Periodically purge upload batches that were never committed.
    #[serde(default)]
    pub batch_cleanup_enabled: bool,
    #[serde(default = "default_batch_cleanup_interval_secs")]
    pub batch_cleanup_interval_secs: u64,
    /// Age after which an uncommitted batch is considered stale.
    #[serde(default = "default_batch_ttl_secs")]
    pub batch_ttl_secs: u64,
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

fn default_batch_cleanup_interval_secs() -> u64 {
    3600
}

fn default_batch_ttl_secs() -> u64 {
    86400
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval_secs: default_snapshot_interval_secs(),
            batch_cleanup_enabled: false,
            batch_cleanup_interval_secs: default_batch_cleanup_interval_secs(),
            batch_ttl_secs: default_batch_ttl_secs(),
        }
    }
}

impl StoreConfig {
    pub fn snapshot_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn batch_cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_cleanup_interval_secs)
    }

    pub fn batch_ttl(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        time::Duration::seconds(i64::try_from(self.batch_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Zero intervals would make `tokio::time::interval` panic.
    pub fn validate(&self) -> Result<(), String> {
        if self.snapshot_path.is_some() && self.snapshot_interval_secs == 0 {
            return Err("store.snapshot_interval_secs cannot be 0".to_string());
        }
        if self.batch_cleanup_enabled && self.batch_cleanup_interval_secs == 0 {
            return Err("store.batch_cleanup_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Extra response headers for paths matching a glob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Glob over full paths: `*` stays within a segment, `**` spans segments.
    pub source: String,
    pub headers: Vec<HeaderField>,
}

/// A permanent or temporary redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub location: String,
    #[serde(default = "default_redirect_status")]
    pub status_code: u16,
}

fn default_redirect_status() -> u16 {
    308
}

/// Read path routing configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub headers: Vec<HeaderRule>,
    /// Source path (or `/prefix/**`) to the asset served in its place.
    #[serde(default)]
    pub rewrites: BTreeMap<String, String>,
    /// Source path to redirect target.
    #[serde(default)]
    pub redirects: BTreeMap<String, RedirectRule>,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.headers {
            if !rule.source.starts_with('/') {
                return Err(format!("http.headers source must start with '/': {}", rule.source));
            }
        }
        for (source, destination) in &self.rewrites {
            if !source.starts_with('/') || !destination.starts_with('/') {
                return Err(format!("http.rewrites must map absolute paths: {source} -> {destination}"));
            }
        }
        for (source, redirect) in &self.redirects {
            if !source.starts_with('/') {
                return Err(format!("http.redirects source must start with '/': {source}"));
            }
            if !matches!(redirect.status_code, 301 | 302 | 303 | 307 | 308) {
                return Err(format!(
                    "http.redirects status for {source} must be 301, 302, 303, 307 or 308, got {}",
                    redirect.status_code
                ));
            }
        }
        Ok(())
    }
}

/// A controller allowed to call the control plane.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Caller identity recorded as asset and proposal owner.
    pub caller: String,
    /// SHA256 hex of the bearer token (64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    pub scope: Scope,
    #[serde(default)]
    pub description: Option<String>,
}

impl ControllerConfig {
    /// Create a test controller with a dummy token hash.
    ///
    /// **For testing only.** The hash is SHA256 of "test-admin-token".
    pub fn for_testing() -> Self {
        Self {
            caller: "admin".to_string(),
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            scope: Scope::Admin,
            description: Some("Test admin token".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid = self.token_hash.len() == 64
            && self.token_hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(format!(
                "controller {} token_hash must be 64 hex characters",
                self.caller
            ));
        }
        if self.caller.is_empty() || self.caller == "anonymous" {
            return Err("controller caller must be a non-empty name other than 'anonymous'".to_string());
        }
        Ok(())
    }
}

/// Signing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key name (e.g., "assets.example.com-1").
    #[serde(default = "default_key_name")]
    pub key_name: String,
    /// Private key source.
    #[serde(default)]
    pub private_key: PrivateKeyConfig,
}

fn default_key_name() -> String {
    "larder-1".to_string()
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_name: default_key_name(),
            private_key: PrivateKeyConfig::Generate,
        }
    }
}

/// Private key source configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// Key stored in a file.
    File {
        /// Path to the private key file.
        path: PathBuf,
    },
    /// Key stored in environment variable.
    Env {
        /// Environment variable name.
        var: String,
    },
    /// Key provided directly as a value (NOT recommended for production).
    Value {
        /// The signing key in `name:base64` format.
        key: String,
    },
    /// Generate a new key on every start (for development only).
    #[default]
    Generate,
}

/// Per-caller rate limiting of mutating calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Mutating requests per minute per caller.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Burst size (allows temporary burst above rate limit).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Time-to-live in seconds for idle caller entries.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    // Deploys upload many chunks in quick succession
    6000
}

fn default_burst_size() -> u32 {
    200
}

fn default_entry_ttl_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Returns warnings for configs that are allowed but risky,
    /// and errors for configs that must be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        if !self.enabled {
            return Ok(warnings);
        }
        if self.requests_per_minute == 0 {
            return Err("rate_limit.requests_per_minute cannot be 0".to_string());
        }
        if self.burst_size < crate::DEFAULT_PARALLEL_CHUNKS {
            warnings.push(format!(
                "rate_limit.burst_size={} is below the advertised chunk parallelism ({}); \
                 parallel uploads will be throttled",
                self.burst_size,
                crate::DEFAULT_PARALLEL_CHUNKS
            ));
        }
        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Rules for collections beyond the built-in ones, or overrides for them.
    #[serde(default)]
    pub collections: BTreeMap<String, SetRule>,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Keeps state in memory, generates a signing key
    /// and configures a single admin controller.
    pub fn for_testing() -> Self {
        Self {
            controllers: vec![ControllerConfig::for_testing()],
            ..Self::default()
        }
    }

    /// Validate every section, returning warnings worth logging.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.server.validate()?;
        self.store.validate()?;
        self.http.validate()?;
        for name in self.collections.keys() {
            validate_collection_name(name).map_err(|e| e.to_string())?;
        }
        for controller in &self.controllers {
            controller.validate()?;
        }

        let mut warnings = self.rate_limit.validate()?;
        if self.controllers.is_empty() {
            warnings.push("no controllers configured; only public collections are writable".to_string());
        }
        if matches!(self.signing.private_key, PrivateKeyConfig::Generate) {
            warnings.push(
                "signing.private_key is 'generate'; certificates change on every restart".to_string(),
            );
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults_match_upload_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.max_chunk_size, crate::MAX_CHUNK_SIZE);
        assert_eq!(config.max_parallel_chunks, 12);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = AppConfig::for_testing();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("generate")));
    }

    #[test]
    fn test_store_config_rejects_zero_intervals() {
        let config = StoreConfig {
            snapshot_path: Some(PathBuf::from("/tmp/x.json")),
            snapshot_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            batch_cleanup_enabled: true,
            batch_cleanup_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redirect_status_validation() {
        let mut config = HttpConfig::default();
        config.redirects.insert(
            "/old".to_string(),
            RedirectRule {
                location: "/new".to_string(),
                status_code: 200,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_controller_token_hash_validation() {
        let mut controller = ControllerConfig::for_testing();
        assert!(controller.validate().is_ok());
        controller.token_hash = "sha256:abc".to_string();
        assert!(controller.validate().is_err());
    }

    #[test]
    fn test_deserialize_minimal_toml_shaped_json() {
        let json = r#"{
            "http": {"redirects": {"/old": {"location": "/new"}}},
            "controllers": [{"caller": "ci", "token_hash": "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5", "scope": "write"}],
            "signing": {"key_name": "k", "private_key": {"type": "env", "var": "KEY"}}
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.http.redirects["/old"].status_code, 308);
        assert_eq!(config.controllers[0].scope, Scope::Write);
        assert!(matches!(config.signing.private_key, PrivateKeyConfig::Env { .. }));
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }
}
