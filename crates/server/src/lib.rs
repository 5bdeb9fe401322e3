//! HTTP server for the larder certified asset store.
//!
//! This crate provides the HTTP control plane and read path:
//! - Chunked upload endpoints
//! - Proposal lifecycle endpoints
//! - Asset, collection and custom domain management
//! - The certified read path with streamed bodies
//! - Prometheus metrics

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
