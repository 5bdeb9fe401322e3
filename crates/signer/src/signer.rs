//! Certificate signing and verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use base64::Engine;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;
use larder_core::{Certificate, ContentHash};

/// Signs certification roots with the instance key.
pub struct CertificateSigner {
    keypair: KeyPair,
}

impl CertificateSigner {
    /// Create a new signer from a key pair.
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a `name:base64` secret key string.
    pub fn from_secret_key(s: &str) -> SignerResult<Self> {
        let keypair = KeyPair::from_secret_key(s)?;
        Ok(Self::new(keypair))
    }

    /// Generate a new signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    /// Get the key name.
    pub fn key_name(&self) -> &str {
        &self.keypair.name
    }

    /// Get the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    /// Get the `name:base64` public key string.
    pub fn public_key_string(&self) -> String {
        self.keypair.to_public_key()
    }

    /// Get the `name:base64` secret key string.
    pub fn secret_key_string(&self) -> String {
        self.keypair.to_secret_key()
    }

    /// Sign a certification root.
    pub fn sign_root(&self, root: &ContentHash) -> Certificate {
        let sig = self
            .keypair
            .secret
            .signing_key()
            .sign(&Certificate::message(root));
        Certificate {
            key_name: self.keypair.name.clone(),
            root: *root,
            signature: base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
        }
    }
}

/// Anything that can certify a tree root.
pub trait Signer: Send + Sync {
    /// Sign a root and return the certificate.
    fn sign_root(&self, root: &ContentHash) -> Certificate;

    /// Get the key name.
    fn key_name(&self) -> &str;

    /// Get the key certificates verify against.
    fn public_key(&self) -> &PublicKey;
}

impl Signer for CertificateSigner {
    fn sign_root(&self, root: &ContentHash) -> Certificate {
        self.sign_root(root)
    }

    fn key_name(&self) -> &str {
        self.key_name()
    }

    fn public_key(&self) -> &PublicKey {
        self.public_key()
    }
}

/// Verify a certificate signature.
pub fn verify_certificate(certificate: &Certificate, public_key: &PublicKey) -> SignerResult<()> {
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(&certificate.signature)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;

    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|bytes: Vec<u8>| {
        SignerError::InvalidSignature(format!("expected 64 bytes, got {}", bytes.len()))
    })?;

    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    public_key
        .verifying_key()
        .verify(&Certificate::message(&certificate.root), &signature)
        .map_err(|_| SignerError::VerificationFailed)
}

/// Verify a certificate against a list of trusted `(name, key)` pairs.
pub fn verify_with_trusted_keys(
    certificate: &Certificate,
    trusted_keys: &[(String, PublicKey)],
) -> bool {
    trusted_keys
        .iter()
        .filter(|(name, _)| name == &certificate.key_name)
        .any(|(_, key)| verify_certificate(certificate, key).is_ok())
}
