//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Capability discovery
        .route("/v1/capabilities", get(handlers::get_capabilities))
        // Health check (unauthenticated for load balancers)
        .route("/v1/health", get(handlers::health_check))
        // Uploads
        .route("/v1/uploads", post(handlers::create_upload))
        .route(
            "/v1/uploads/{batch_id}/chunks/{order_id}",
            put(handlers::upload_chunk),
        )
        .route(
            "/v1/uploads/{batch_id}/commit",
            post(handlers::commit_upload),
        )
        // Proposals
        .route(
            "/v1/proposals",
            post(handlers::init_proposal).get(handlers::list_proposals),
        )
        .route("/v1/proposals/count", get(handlers::count_proposals))
        .route(
            "/v1/proposals/assets/delete",
            post(handlers::delete_proposal_assets),
        )
        .route("/v1/proposals/{id}", get(handlers::get_proposal))
        .route("/v1/proposals/{id}/submit", post(handlers::submit_proposal))
        .route("/v1/proposals/{id}/commit", post(handlers::commit_proposal))
        .route("/v1/proposals/{id}/reject", post(handlers::reject_proposal))
        // Collections and assets
        .route("/v1/collections", get(handlers::list_rules))
        .route("/v1/collections/{collection}", put(handlers::set_rule))
        .route(
            "/v1/collections/{collection}/assets",
            get(handlers::list_assets).delete(handlers::delete_assets),
        )
        .route(
            "/v1/collections/{collection}/assets/count",
            get(handlers::count_assets),
        )
        .route(
            "/v1/collections/{collection}/assets/delete-filtered",
            post(handlers::delete_filtered_assets),
        )
        .route(
            "/v1/collections/{collection}/assets/delete-many",
            post(handlers::delete_many_assets),
        )
        .route(
            "/v1/collections/{collection}/asset",
            get(handlers::get_asset).delete(handlers::delete_asset),
        )
        // Custom domains
        .route("/v1/domains", get(handlers::list_domains))
        .route(
            "/v1/domains/{domain}",
            put(handlers::set_domain).delete(handlers::delete_domain),
        )
        // Streaming callback for large bodies
        .route("/v1/http/stream", post(handlers::streaming_callback));

    // Everything else is the certified read path
    let mut router = Router::new()
        .merge(api_routes)
        .fallback(handlers::serve_asset);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
