//! Ed25519 key types and operations.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;

/// Split `keyname:base64`, rejecting an empty key name.
fn split_key_string(s: &str) -> SignerResult<(&str, &str)> {
    match s.split_once(':') {
        Some((name, b64)) if !name.is_empty() => Ok((name, b64)),
        _ => Err(SignerError::KeyParsing(
            "expected 'keyname:base64' format".to_string(),
        )),
    }
}

/// A secret (private) key for signing.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse from `keyname:base64(secret || public)`.
    pub fn from_key_string(s: &str) -> SignerResult<(String, Self)> {
        let (name, b64) = split_key_string(s)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;

        if bytes.len() != 64 {
            return Err(SignerError::KeyParsing(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }

        let secret_bytes: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| SignerError::KeyParsing("invalid secret key bytes".to_string()))?;

        let inner = SigningKey::from_bytes(&secret_bytes);
        if inner.verifying_key().as_bytes()[..] != bytes[32..] {
            return Err(SignerError::KeyParsing(
                "public half does not match the secret key".to_string(),
            ));
        }

        Ok((name.to_string(), Self { inner }))
    }

    /// Encode as `keyname:base64(secret || public)`.
    pub fn to_key_string(&self, key_name: &str) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.inner.as_bytes());
        bytes.extend_from_slice(self.inner.verifying_key().as_bytes());
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        format!("{key_name}:{b64}")
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Get the inner signing key.
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A public key for verification.
#[derive(Clone)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse from `keyname:base64(public)`.
    pub fn from_key_string(s: &str) -> SignerResult<(String, Self)> {
        let (name, b64) = split_key_string(s)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;

        if bytes.len() != 32 {
            return Err(SignerError::KeyParsing(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::KeyParsing("invalid public key bytes".to_string()))?;

        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))?;

        Ok((name.to_string(), Self { inner }))
    }

    /// Encode as `keyname:base64(public)`.
    pub fn to_key_string(&self, key_name: &str) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes());
        format!("{key_name}:{b64}")
    }

    /// Get the inner verifying key.
    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.as_bytes() == other.inner.as_bytes()
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes());
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

/// A key pair containing both secret and public keys.
pub struct KeyPair {
    /// The key name (e.g., "assets.example.com-1").
    pub name: String,
    /// The secret key.
    pub secret: SecretKey,
    /// The public key.
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair with the given name.
    pub fn generate(name: impl Into<String>) -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self {
            name: name.into(),
            secret,
            public,
        }
    }

    /// Parse a secret key string.
    pub fn from_secret_key(s: &str) -> SignerResult<Self> {
        let (name, secret) = SecretKey::from_key_string(s)?;
        let public = secret.public_key();
        Ok(Self {
            name,
            secret,
            public,
        })
    }

    /// Get the secret key string.
    pub fn to_secret_key(&self) -> String {
        self.secret.to_key_string(&self.name)
    }

    /// Get the public key string.
    pub fn to_public_key(&self) -> String {
        self.public.to_key_string(&self.name)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public", &self.public)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let keypair = KeyPair::generate("test-key-1");
        assert_eq!(keypair.name, "test-key-1");
        assert!(format!("{:?}", keypair.secret).contains("REDACTED"));
    }

    #[test]
    fn test_secret_key_string() {
        let keypair = KeyPair::generate("test-key-1");
        let encoded = keypair.to_secret_key();
        assert!(encoded.starts_with("test-key-1:"));

        let parsed = KeyPair::from_secret_key(&encoded).unwrap();
        assert_eq!(parsed.name, keypair.name);
        assert_eq!(
            parsed.public.inner.as_bytes(),
            keypair.public.inner.as_bytes()
        );
    }

    #[test]
    fn test_public_key_string() {
        let keypair = KeyPair::generate("test-key-1");
        let (name, public) = PublicKey::from_key_string(&keypair.to_public_key()).unwrap();
        assert_eq!(name, keypair.name);
        assert_eq!(public, keypair.public);
    }

    #[test]
    fn test_rejects_mismatched_public_half() {
        use base64::Engine;
        let a = KeyPair::generate("a");
        let b = KeyPair::generate("a");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(a.secret.inner.as_bytes());
        bytes.extend_from_slice(b.public.inner.as_bytes());
        let forged = format!(
            "a:{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );
        assert!(SecretKey::from_key_string(&forged).is_err());
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(matches!(
            SecretKey::from_key_string("no-separator"),
            Err(SignerError::KeyParsing(_))
        ));
        assert!(matches!(
            SecretKey::from_key_string(":AAAA"),
            Err(SignerError::KeyParsing(_))
        ));
        assert!(matches!(
            PublicKey::from_key_string("name:AAAA"),
            Err(SignerError::KeyParsing(_))
        ));
    }
}
