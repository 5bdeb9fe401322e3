//! Caller resolution and request tracing middleware.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use larder_core::Caller;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a bearer token the way controller token hashes are configured.
pub fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Resolve the caller and set up trace context.
///
/// A known bearer token maps to its controller. Anything else, including an
/// unknown token, is the anonymous caller; collection rules decide what that
/// caller may do.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let caller = match extract_bearer_token(&req) {
        Some(token) => match state.controllers.get(&hash_token(token)) {
            Some(controller) => controller.clone(),
            None => {
                tracing::debug!(trace_id = %trace_id_str, "Unknown bearer token, treating caller as anonymous");
                Caller::anonymous()
            }
        },
        None => Caller::anonymous(),
    };
    let caller_id = caller.id.as_str().to_string();
    req.extensions_mut().insert(caller);

    next.run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str, caller = %caller_id))
        .await
}

/// The caller resolved by [`auth_middleware`], or anonymous when the middleware did not run.
pub fn get_caller(req: &Request) -> Caller {
    req.extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or_else(Caller::anonymous)
}

pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_matches_configured_hash() {
        assert_eq!(
            hash_token("test-admin-token"),
            larder_core::config::ControllerConfig::for_testing().token_hash
        );
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\ndef\u{7f}");
        assert_eq!(id.as_str(), "abcdef");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        let fallback = TraceId::from_client("\n\n");
        assert!(Uuid::parse_str(fallback.as_str()).is_ok());
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let req = Request::builder()
            .header(AUTHORIZATION, "bEaReR secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), Some("secret"));

        let req = Request::builder()
            .header(AUTHORIZATION, "Basic secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }
}
