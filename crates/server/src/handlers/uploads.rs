//! Upload control plane handlers.

use crate::auth::{get_caller, get_trace_id};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BATCHES_OPENED, BYTES_UPLOADED, CHUNK_UPLOAD_DURATION, CHUNKS_UPLOADED, UPLOAD_COMMIT_DURATION,
    UPLOADS_COMMITTED, observe_depot, record_upload_error,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use larder_core::{BatchId, Caller, ChunkId, CommitBatch, HeaderField, InitAssetKey, ProposalId, UploadChunk};
use larder_store::{CommittedUpload, StoreError};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Slack on top of `max_chunk_size` when reading a chunk body, so an oversized
/// chunk reaches the store and fails with its size in the error.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    #[serde(flatten)]
    pub key: InitAssetKey,
    /// Stage the upload under this proposal instead of writing it live.
    #[serde(default)]
    pub proposal_id: Option<ProposalId>,
}

#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub batch_id: BatchId,
}

#[derive(Debug, Serialize)]
pub struct UploadChunkResponse {
    pub chunk_id: ChunkId,
}

#[derive(Debug, Deserialize)]
pub struct CommitUploadRequest {
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub headers: Vec<HeaderField>,
    /// Current version of the asset being replaced; omit for new assets.
    #[serde(default)]
    pub version: Option<u64>,
}

fn record_store_error<T>(result: Result<T, StoreError>) -> ApiResult<T> {
    result.map_err(|e| {
        record_upload_error(e.code());
        e.into()
    })
}

/// POST /v1/uploads - Open a batch.
pub async fn create_upload(
    State(state): State<AppState>,
    axum::Extension(caller): axum::Extension<Caller>,
    Json(request): Json<CreateUploadRequest>,
) -> ApiResult<(StatusCode, Json<CreateUploadResponse>)> {
    let mut depot = state.depot.write().await;
    let batch_id = record_store_error(depot.init_asset_upload(&caller, request.key, request.proposal_id))?;
    observe_depot(&depot);
    BATCHES_OPENED.inc();

    Ok((StatusCode::CREATED, Json(CreateUploadResponse { batch_id })))
}

/// PUT /v1/uploads/{batch_id}/chunks/{order_id} - Store one chunk.
///
/// The raw request body is the chunk. Re-sending the same `order_id`
/// replaces the earlier chunk.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((batch_id, order_id)): Path<(String, u64)>,
    req: Request,
) -> ApiResult<Json<UploadChunkResponse>> {
    let start_time = Instant::now();
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let caller = get_caller(&req);
    let batch_id = BatchId::parse(&batch_id)?;

    let _permit = state.upload_permits.clone().try_acquire_owned().map_err(|_| {
        record_upload_error("too_many_chunks_in_flight");
        ApiError::TooManyRequests(format!(
            "at most {} chunk uploads may be in flight",
            state.config.server.max_parallel_chunks
        ))
    })?;

    let limit = state.config.server.max_chunk_size as usize + CHUNK_UPLOAD_BUFFER;
    let content = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| {
            record_upload_error("chunk_body");
            ApiError::PayloadTooLarge(format!("failed to read chunk: {e}"))
        })?;
    let size = content.len() as u64;

    let chunk_id = {
        let mut depot = state.depot.write().await;
        record_store_error(depot.upload_asset_chunk(
            &caller,
            UploadChunk {
                batch_id,
                content,
                order_id,
            },
        ))?
    };

    CHUNKS_UPLOADED.inc();
    BYTES_UPLOADED.inc_by(size);
    CHUNK_UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());
    tracing::debug!(
        trace_id = %trace_id,
        batch_id = %batch_id,
        order_id,
        chunk_id = %chunk_id,
        size,
        "Chunk stored"
    );

    Ok(Json(UploadChunkResponse { chunk_id }))
}

/// POST /v1/uploads/{batch_id}/commit - Seal a batch.
pub async fn commit_upload(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    axum::Extension(caller): axum::Extension<Caller>,
    Json(request): Json<CommitUploadRequest>,
) -> ApiResult<Json<CommittedUpload>> {
    let start_time = Instant::now();
    let batch_id = BatchId::parse(&batch_id)?;

    let mut depot = state.depot.write().await;
    let committed = record_store_error(depot.commit_asset_upload(
        &caller,
        CommitBatch {
            batch_id,
            chunk_ids: request.chunk_ids,
            headers: request.headers,
            version: request.version,
        },
    ))?;
    observe_depot(&depot);
    drop(depot);

    let destination = match committed {
        CommittedUpload::Live { .. } => "live",
        CommittedUpload::Staged { .. } => "staged",
    };
    UPLOADS_COMMITTED.with_label_values(&[destination]).inc();
    UPLOAD_COMMIT_DURATION.observe(start_time.elapsed().as_secs_f64());

    Ok(Json(committed))
}
