//! Content encodings an asset can be stored and served in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A content encoding, matching the HTTP `Content-Encoding` token.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EncodingType {
    #[default]
    Identity,
    Gzip,
    Compress,
    Deflate,
    Br,
}

impl EncodingType {
    /// Encodings in the order the read path prefers them.
    pub const PREFERENCE: [EncodingType; 5] = [
        Self::Br,
        Self::Gzip,
        Self::Deflate,
        Self::Compress,
        Self::Identity,
    ];

    /// Parse from the HTTP token.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            "compress" | "x-compress" => Ok(Self::Compress),
            "deflate" => Ok(Self::Deflate),
            "br" => Ok(Self::Br),
            other => Err(crate::Error::InvalidEncoding(other.to_string())),
        }
    }

    /// Get the HTTP token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Compress => "compress",
            Self::Deflate => "deflate",
            Self::Br => "br",
        }
    }

    /// Value for the `Content-Encoding` response header, if one is sent.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
