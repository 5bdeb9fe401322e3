//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use larder_core::config::AppConfig;
use larder_server::{AppState, create_router};
use larder_signer::CertificateSigner;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// A raw response: status, headers and the complete body.
#[allow(dead_code)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[allow(dead_code)]
impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the default test configuration.
    pub async fn new() -> Self {
        Self::with_config(super::fixtures::test_config()).await
    }

    /// Create a test server whose snapshots go to a temporary directory.
    pub async fn with_config(mut config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        if config.store.snapshot_path.is_none() {
            config.store.snapshot_path = Some(temp_dir.path().join("depot.json"));
        }

        larder_server::metrics::register_metrics();
        let state = AppState::new(config, CertificateSigner::generate("test-1"), None)
            .expect("Failed to create state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request with an optional JSON body and bearer token.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let response = self.send(builder.body(body).unwrap()).await;
        let json = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body).unwrap_or(Value::Null)
        };
        (response.status, json)
    }

    /// Send a request and collect the full response.
    pub async fn send(&self, request: Request<Body>) -> RawResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap().to_string()))
            .collect();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        RawResponse {
            status,
            headers,
            body,
        }
    }

    /// Plain GET with extra headers.
    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> RawResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Upload `body` as one asset through the HTTP API, in chunks of `chunk_size`.
    ///
    /// Returns the commit response.
    pub async fn upload(
        &self,
        token: &str,
        collection: &str,
        full_path: &str,
        proposal_id: Option<u64>,
        body: &[u8],
        chunk_size: usize,
    ) -> (StatusCode, Value) {
        let mut init = serde_json::json!({
            "collection": collection,
            "full_path": full_path,
            "name": full_path.rsplit('/').next().unwrap_or_default(),
        });
        if let Some(id) = proposal_id {
            init["proposal_id"] = serde_json::json!(id);
        }
        self.upload_with(token, init, body, chunk_size).await
    }

    /// Like [`TestServer::upload`], with a caller-built init request.
    pub async fn upload_with(
        &self,
        token: &str,
        init: Value,
        body: &[u8],
        chunk_size: usize,
    ) -> (StatusCode, Value) {
        let (status, created) = self.json("POST", "/v1/uploads", Some(init), Some(token)).await;
        if status != StatusCode::CREATED {
            return (status, created);
        }
        let batch_id = created["batch_id"].as_u64().unwrap();

        let mut chunk_ids = Vec::new();
        for (order_id, piece) in body.chunks(chunk_size.max(1)).enumerate() {
            let request = Request::builder()
                .method("PUT")
                .uri(format!("/v1/uploads/{batch_id}/chunks/{order_id}"))
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(piece.to_vec()))
                .unwrap();
            let response = self.send(request).await;
            assert_eq!(response.status, StatusCode::OK, "chunk {order_id} rejected");
            let json: Value = serde_json::from_slice(&response.body).unwrap();
            chunk_ids.push(json["chunk_id"].as_u64().unwrap());
        }

        self.json(
            "POST",
            &format!("/v1/uploads/{batch_id}/commit"),
            Some(serde_json::json!({
                "chunk_ids": chunk_ids,
                "headers": [["content-type", "text/html"]],
            })),
            Some(token),
        )
        .await
    }
}
