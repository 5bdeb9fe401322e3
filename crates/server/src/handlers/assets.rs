//! Collection rules and asset management handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::proposals::{CountResponse, DeletedResponse};
use crate::metrics::observe_depot;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use larder_core::{
    AssetView, Caller, CallerId, ListMatcher, ListOrder, ListOrderField, ListPaginate, ListParams,
    ListResults, Rule, SetRule,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Flat query form of [`ListParams`].
#[derive(Debug, Default, Deserialize)]
pub struct ListAssetsQuery {
    /// Substring of the path; a trailing `*` makes it a prefix.
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_by: Option<ListOrderField>,
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub start_after: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl From<ListAssetsQuery> for ListParams {
    fn from(query: ListAssetsQuery) -> Self {
        Self {
            matcher: ListMatcher {
                key: query.matcher,
                description: query.description,
            },
            order: ListOrder {
                desc: query.desc,
                field: query.order_by.unwrap_or_default(),
            },
            paginate: ListPaginate {
                start_after: query.start_after,
                limit: query.limit,
            },
            owner: query.owner.map(CallerId::new),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    pub full_path: String,
    /// Expected current version, for deletes.
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    pub full_paths: Vec<String>,
}

// Collections

/// GET /v1/collections
pub async fn list_rules(State(state): State<AppState>) -> Json<BTreeMap<String, Rule>> {
    Json(state.depot.read().await.list_rules().clone())
}

/// PUT /v1/collections/{collection} - Create or update a rule. Admin only.
pub async fn set_rule(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(rule): Json<SetRule>,
) -> ApiResult<Json<Rule>> {
    let rule = state.depot.write().await.set_rule(&caller, &collection, rule)?;
    tracing::info!(collection = %collection, version = rule.version, "Collection rule set");
    Ok(Json(rule))
}

// Assets

/// GET /v1/collections/{collection}/assets
pub async fn list_assets(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListAssetsQuery>,
) -> ApiResult<Json<ListResults<AssetView>>> {
    let params = ListParams::from(query);
    let results = state
        .depot
        .read()
        .await
        .list_assets(&caller, &collection, &params)?;
    Ok(Json(results))
}

/// GET /v1/collections/{collection}/assets/count
pub async fn count_assets(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListAssetsQuery>,
) -> ApiResult<Json<CountResponse>> {
    let params = ListParams::from(query);
    let count = state
        .depot
        .read()
        .await
        .count_assets(&caller, &collection, &params)?;
    Ok(Json(CountResponse { count }))
}

/// GET /v1/collections/{collection}/asset?full_path=
pub async fn get_asset(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<AssetQuery>,
) -> ApiResult<Json<AssetView>> {
    state
        .depot
        .read()
        .await
        .get_asset(&caller, &collection, &query.full_path)?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("no asset found: {collection} {}", query.full_path))
        })
}

/// DELETE /v1/collections/{collection}/asset?full_path=&version=
pub async fn delete_asset(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<AssetQuery>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut depot = state.depot.write().await;
    depot.del_asset(&caller, &collection, &query.full_path, query.version)?;
    observe_depot(&depot);
    Ok(Json(DeletedResponse { deleted: 1 }))
}

/// DELETE /v1/collections/{collection}/assets - Clear a collection.
///
/// Reserved files such as the custom domains file survive.
pub async fn delete_assets(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut depot = state.depot.write().await;
    let deleted = depot.del_assets(&caller, &collection)?;
    observe_depot(&depot);
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /v1/collections/{collection}/assets/delete-filtered
pub async fn delete_filtered_assets(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(params): Json<ListParams>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut depot = state.depot.write().await;
    let deleted = depot.del_filtered_assets(&caller, &collection, &params)?;
    observe_depot(&depot);
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /v1/collections/{collection}/assets/delete-many
pub async fn delete_many_assets(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<DeleteManyRequest>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut depot = state.depot.write().await;
    let deleted = depot.del_many_assets(&caller, &collection, &request.full_paths)?;
    observe_depot(&depot);
    Ok(Json(DeletedResponse { deleted }))
}
