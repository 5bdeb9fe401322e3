//! Capability discovery and health endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use larder_store::http::DEFAULT_CERTIFICATE_VERSION;
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Maximum chunk size in bytes.
    pub max_chunk_size: u64,
    /// Size of each slice of a streamed body.
    pub stream_chunk_size: u64,
    /// Recommended parallel chunk upload count.
    pub recommended_parallelism: u32,
    pub certificate_versions: [u16; 2],
    pub default_certificate_version: u16,
    /// Key that signs certificates, as `name:base64`.
    pub public_key: String,
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    Ok(Json(CapabilitiesResponse {
        max_chunk_size: state.config.server.max_chunk_size,
        stream_chunk_size: state.config.server.stream_chunk_size,
        recommended_parallelism: state.config.server.max_parallel_chunks,
        certificate_versions: [1, 2],
        default_certificate_version: DEFAULT_CERTIFICATE_VERSION,
        public_key: state.signer.public_key_string(),
        api_version: "v1",
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated for load balancers and liveness checks. Returns only the
/// status and version.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
