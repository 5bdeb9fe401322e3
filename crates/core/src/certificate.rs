//! Signed certification roots.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Domain separator for certificate signatures.
const CERTIFICATE_CONTEXT: &[u8] = b"larder-certificate-v1\0";

/// A certification root signed by the instance key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Name of the signing key.
    pub key_name: String,
    /// Root of the certification tree at signing time.
    pub root: ContentHash,
    /// Base64 Ed25519 signature over [`Certificate::message`].
    pub signature: String,
}

impl Certificate {
    /// The bytes signed for a given root.
    pub fn message(root: &ContentHash) -> Vec<u8> {
        let mut message = Vec::with_capacity(CERTIFICATE_CONTEXT.len() + 32);
        message.extend_from_slice(CERTIFICATE_CONTEXT);
        message.extend_from_slice(root.as_bytes());
        message
    }
}
