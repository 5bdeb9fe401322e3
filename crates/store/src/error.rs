//! Store error types.

use larder_core::{BatchId, ChunkId, ProposalId, ProposalStatus};
use larder_signer::SignerError;
use thiserror::Error;

/// Broad classes of store failures.
///
/// Callers use the class to decide whether a retry can succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or forbidden input. Rejected before any state change.
    Validation,
    /// Insufficient scope or ownership.
    Permission,
    /// Stale version or wrong proposal state. Retry after re-reading.
    Concurrency,
    /// Hash mismatch.
    Integrity,
    NotFound,
    /// Size or rate limits.
    Limit,
    Internal,
}

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("reserved asset: {0}")]
    ReservedAsset(String),

    #[error("pattern mismatch: {0}")]
    PatternMismatch(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("version mismatch: expected {expected:?}, current {current:?}")]
    VersionMismatch {
        expected: Option<u64>,
        current: Option<u64>,
    },

    #[error("Proposal cannot be submitted. Current status: {0}")]
    CannotSubmit(ProposalStatus),

    #[error("Proposal cannot be committed. Current status: {0}")]
    CannotCommit(ProposalStatus),

    #[error("Proposal cannot be rejected. Current status: {0}")]
    CannotReject(ProposalStatus),

    #[error("integrity error: expected sha256 {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("proposal {0} has no staged assets")]
    EmptyAssets(ProposalId),

    #[error("no proposal found: {0}")]
    NoProposalFound(ProposalId),

    #[error("no batch found: {0}")]
    NoBatchFound(BatchId),

    #[error("no chunk found: {0}")]
    NoChunkFound(ChunkId),

    #[error("no collection found: {0}")]
    NoCollectionFound(String),

    #[error("no asset found: {collection} {full_path}")]
    NoAssetFound {
        collection: String,
        full_path: String,
    },

    #[error("no custom domain found: {0}")]
    NoDomainFound(String),

    #[error("chunk too large: {size} bytes (max {max})")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("asset too large: {size} bytes (max {max})")]
    AssetTooLarge { size: u64, max: u64 },

    #[error("stale streaming token: {0}")]
    StaleStream(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
}

impl From<larder_core::Error> for StoreError {
    fn from(err: larder_core::Error) -> Self {
        use larder_core::Error;
        match err {
            Error::InvalidPath(msg) => Self::InvalidPath(msg),
            Error::ReservedPath(msg) => Self::ReservedAsset(msg),
            Error::PatternMismatch(msg) => Self::PatternMismatch(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl StoreError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath(_)
            | Self::ReservedAsset(_)
            | Self::PatternMismatch(_)
            | Self::Validation(_) => ErrorKind::Validation,
            Self::PermissionDenied(_) => ErrorKind::Permission,
            Self::VersionMismatch { .. }
            | Self::CannotSubmit(_)
            | Self::CannotCommit(_)
            | Self::CannotReject(_)
            | Self::StaleStream(_) => ErrorKind::Concurrency,
            Self::Integrity { .. } | Self::EmptyAssets(_) => ErrorKind::Integrity,
            Self::NoProposalFound(_)
            | Self::NoBatchFound(_)
            | Self::NoChunkFound(_)
            | Self::NoCollectionFound(_)
            | Self::NoAssetFound { .. }
            | Self::NoDomainFound(_) => ErrorKind::NotFound,
            Self::RateLimited(_) | Self::ChunkTooLarge { .. } | Self::AssetTooLarge { .. } => {
                ErrorKind::Limit
            }
            Self::Snapshot(_) | Self::Io(_) | Self::Signer(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::ReservedAsset(_) => "reserved_asset",
            Self::PatternMismatch(_) => "pattern_mismatch",
            Self::Validation(_) => "validation_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::RateLimited(_) => "rate_limited",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::CannotSubmit(_) => "cannot_submit",
            Self::CannotCommit(_) => "cannot_commit",
            Self::CannotReject(_) => "cannot_reject",
            Self::Integrity { .. } => "integrity_error",
            Self::EmptyAssets(_) => "empty_assets",
            Self::NoProposalFound(_) => "no_proposal_found",
            Self::NoBatchFound(_) => "no_batch_found",
            Self::NoChunkFound(_) => "no_chunk_found",
            Self::NoCollectionFound(_) => "no_collection_found",
            Self::NoAssetFound { .. } => "no_asset_found",
            Self::NoDomainFound(_) => "no_domain_found",
            Self::ChunkTooLarge { .. } => "chunk_too_large",
            Self::AssetTooLarge { .. } => "asset_too_large",
            Self::StaleStream(_) => "stale_stream",
            Self::Snapshot(_) => "snapshot_error",
            Self::Io(_) => "io_error",
            Self::Signer(_) => "signer_error",
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
