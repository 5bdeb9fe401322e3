//! Signer error types.

use thiserror::Error;

/// Key handling and certificate verification errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("certificate verification failed")]
    VerificationFailed,

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
