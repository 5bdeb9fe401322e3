//! Proposal lifecycle handlers.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{observe_depot, record_transition};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use larder_core::{Caller, ContentHash, Proposal, ProposalId, ProposalStatus, ProposalType};
use larder_store::{CommitProposal, ListProposalsParams};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct InitProposalResponse {
    pub proposal_id: ProposalId,
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
pub struct SubmitProposalResponse {
    /// Proposal version after the transition.
    pub version: u64,
    pub proposal: Proposal,
}

/// Hash presented to commit or reject.
#[derive(Debug, Deserialize)]
pub struct ProposalHashRequest {
    pub sha256: ContentHash,
}

#[derive(Debug, Deserialize)]
pub struct DeleteProposalAssetsRequest {
    pub proposal_ids: Vec<ProposalId>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

fn parse_id(id: &str) -> ApiResult<ProposalId> {
    Ok(ProposalId::parse(id)?)
}

/// POST /v1/proposals - Create a proposal.
pub async fn init_proposal(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(proposal_type): Json<ProposalType>,
) -> ApiResult<(StatusCode, Json<InitProposalResponse>)> {
    let (proposal_id, proposal) = state
        .depot
        .write()
        .await
        .init_proposal(&caller, proposal_type)?;
    record_transition(proposal.status);
    tracing::info!(proposal_id = %proposal_id, caller = %caller.id, "Proposal created");

    Ok((
        StatusCode::CREATED,
        Json(InitProposalResponse {
            proposal_id,
            proposal,
        }),
    ))
}

/// GET /v1/proposals
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ListProposalsParams>,
) -> Json<Vec<Proposal>> {
    Json(state.depot.read().await.list_proposals(&params))
}

/// GET /v1/proposals/count
pub async fn count_proposals(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.depot.read().await.count_proposals(),
    })
}

/// GET /v1/proposals/{id}
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Proposal>> {
    let proposal_id = parse_id(&id)?;
    state
        .depot
        .read()
        .await
        .get_proposal(proposal_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no proposal found: {proposal_id}")))
}

/// POST /v1/proposals/{id}/submit - Freeze the staged set.
pub async fn submit_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<SubmitProposalResponse>> {
    let proposal_id = parse_id(&id)?;
    let (version, proposal) = state
        .depot
        .write()
        .await
        .submit_proposal(&caller, proposal_id)?;
    record_transition(proposal.status);
    tracing::info!(
        proposal_id = %proposal_id,
        sha256 = ?proposal.sha256,
        "Proposal submitted"
    );

    Ok(Json(SubmitProposalResponse { version, proposal }))
}

/// POST /v1/proposals/{id}/commit - Apply a submitted proposal.
///
/// A hash mismatch or an empty staged set fails the proposal for good.
pub async fn commit_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<ProposalHashRequest>,
) -> ApiResult<Json<Proposal>> {
    let proposal_id = parse_id(&id)?;
    let mut depot = state.depot.write().await;
    let result = depot.commit_proposal(
        &caller,
        CommitProposal {
            proposal_id,
            sha256: request.sha256,
        },
    );
    observe_depot(&depot);

    match result {
        Ok(proposal) => {
            record_transition(proposal.status);
            tracing::info!(proposal_id = %proposal_id, "Proposal executed");
            Ok(Json(proposal))
        }
        Err(e) => {
            if depot
                .get_proposal(proposal_id)
                .is_some_and(|p| p.status == ProposalStatus::Failed)
            {
                record_transition(ProposalStatus::Failed);
                tracing::warn!(proposal_id = %proposal_id, error = %e, "Proposal failed");
            }
            Err(e.into())
        }
    }
}

/// POST /v1/proposals/{id}/reject
pub async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<ProposalHashRequest>,
) -> ApiResult<Json<Proposal>> {
    let proposal_id = parse_id(&id)?;
    let proposal = state.depot.write().await.reject_proposal(
        &caller,
        CommitProposal {
            proposal_id,
            sha256: request.sha256,
        },
    )?;
    record_transition(proposal.status);
    tracing::info!(proposal_id = %proposal_id, "Proposal rejected");

    Ok(Json(proposal))
}

/// POST /v1/proposals/assets/delete - Drop staged data of finished proposals.
pub async fn delete_proposal_assets(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<DeleteProposalAssetsRequest>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut depot = state.depot.write().await;
    let deleted = depot.delete_proposal_assets(&caller, &request.proposal_ids)?;
    observe_depot(&depot);
    Ok(Json(DeletedResponse { deleted }))
}
