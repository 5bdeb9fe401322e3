//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("reserved asset: {0}")]
    ReservedPath(String),

    #[error("pattern mismatch: {0}")]
    PatternMismatch(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
