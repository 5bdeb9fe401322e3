//! Certificate signing for the larder asset store.
//!
//! This crate provides:
//! - Ed25519 key generation and management
//! - Certification root signing
//! - Certificate verification

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey};
pub use signer::{CertificateSigner, Signer, verify_certificate, verify_with_trusted_keys};
