//! Custom domain handlers.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use larder_core::Caller;
use larder_store::CustomDomain;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
pub struct SetDomainRequest {
    /// Boundary node registration ID, if already registered.
    #[serde(default)]
    pub bn_id: Option<String>,
}

/// GET /v1/domains
pub async fn list_domains(State(state): State<AppState>) -> Json<BTreeMap<String, CustomDomain>> {
    Json(state.depot.read().await.list_custom_domains().clone())
}

/// PUT /v1/domains/{domain} - Add or update a domain. Admin only.
pub async fn set_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Extension(caller): Extension<Caller>,
    body: Option<Json<SetDomainRequest>>,
) -> ApiResult<Json<CustomDomain>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let entry = state
        .depot
        .write()
        .await
        .set_custom_domain(&caller, &domain, request.bn_id)?;
    tracing::info!(domain = %domain, version = entry.version, "Custom domain set");
    Ok(Json(entry))
}

/// DELETE /v1/domains/{domain}
pub async fn delete_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<CustomDomain>> {
    let removed = state
        .depot
        .write()
        .await
        .delete_custom_domain(&caller, &domain)?;
    tracing::info!(domain = %domain, "Custom domain removed");
    Ok(Json(removed))
}
