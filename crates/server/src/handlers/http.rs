//! Certified read path over plain HTTP.
//!
//! Every path not claimed by the API is answered from the depot. Bodies
//! larger than one stream slice are sent as a chunked response: the first
//! slice comes from the initial lookup, the rest from streaming callbacks
//! issued while the body is written.

use crate::auth::get_trace_id;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{HTTP_RESPONSES, STREAMED_SLICES};
use crate::state::AppState;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use larder_store::{
    HttpRequest, HttpResponse, StreamingCallbackResponse, StreamingCallbackToken,
    StreamingStrategy,
};

/// Request header selecting the certificate version (1 or 2).
pub const CERTIFICATE_VERSION_HEADER: &str = "x-certificate-version";

/// Largest request body forwarded to the read path.
const MAX_READ_BODY_SIZE: usize = 64 * 1024;

/// Fallback handler: answer any other path from the certified store.
pub async fn serve_asset(State(state): State<AppState>, req: Request) -> Response {
    match serve_asset_inner(state, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve_asset_inner(state: AppState, req: Request) -> ApiResult<Response> {
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let method = req.method().as_str().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let certificate_version = match req.headers().get(CERTIFICATE_VERSION_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u16>().ok())
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("invalid {CERTIFICATE_VERSION_HEADER} header"))
                })?,
        ),
        None => None,
    };

    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body = axum::body::to_bytes(req.into_body(), MAX_READ_BODY_SIZE)
        .await
        .map_err(|e| ApiError::PayloadTooLarge(format!("failed to read request body: {e}")))?;

    let request = HttpRequest {
        method,
        url,
        headers,
        body,
        certificate_version,
    };
    let response = state.depot.read().await.http_request(&request);

    HTTP_RESPONSES
        .with_label_values(&[response.status_code.to_string().as_str()])
        .inc();
    tracing::debug!(
        trace_id = %trace_id,
        url = %request.url,
        status = response.status_code,
        streamed = response.streaming_strategy.is_some(),
        "Served certified response"
    );

    Ok(into_http_response(state, response))
}

/// Turn a store response into an axum response, streaming the remaining slices.
fn into_http_response(state: AppState, response: HttpResponse) -> Response {
    let HttpResponse {
        status_code,
        headers,
        body,
        streaming_strategy,
    } = response;
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match streaming_strategy {
        Some(StreamingStrategy::Callback { token }) => {
            let first = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
            let rest = futures::stream::try_unfold(Some(token), move |token| {
                let state = state.clone();
                async move {
                    let Some(token) = token else {
                        return Ok::<_, std::io::Error>(None);
                    };
                    let next = state
                        .depot
                        .read()
                        .await
                        .http_request_streaming_callback(&token);
                    match next {
                        Ok(next) => {
                            STREAMED_SLICES.inc();
                            Ok(Some((next.body, next.token)))
                        }
                        Err(e) => {
                            tracing::warn!(full_path = %token.full_path, error = %e, "Stream aborted");
                            Err(std::io::Error::other(e.to_string()))
                        }
                    }
                }
            });
            Body::from_stream(first.chain(rest))
        }
        None => Body::from(body),
    };

    let mut http_response = Response::new(body);
    *http_response.status_mut() = status;
    let header_map = http_response.headers_mut();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                header_map.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping header that is not valid HTTP"),
        }
    }
    http_response
}

/// POST /v1/http/stream - Fetch the next slice of a streamed body.
pub async fn streaming_callback(
    State(state): State<AppState>,
    Json(token): Json<StreamingCallbackToken>,
) -> ApiResult<Json<StreamingCallbackResponse>> {
    let next = state
        .depot
        .read()
        .await
        .http_request_streaming_callback(&token)?;
    STREAMED_SLICES.inc();
    Ok(Json(next))
}
