//! Assets, their keys and stored encodings.

use crate::access::CallerId;
use crate::encoding::EncodingType;
use crate::hash::ContentHash;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// A response header as a `(name, value)` pair.
pub type HeaderField = (String, String);

/// Identifies an asset inside a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetKey {
    /// Absolute request path, e.g. `/index.html`.
    pub full_path: String,
    pub collection: String,
    pub owner: CallerId,
    /// Optional access token required to read the asset over HTTP.
    pub token: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

/// One stored representation of an asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEncoding {
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    pub sha256: ContentHash,
    pub total_length: u64,
    /// Reassembled body, kept as the ordered chunk buffers it was uploaded in.
    #[serde(with = "crate::codec::base64_bytes_vec")]
    pub content_chunks: Vec<Bytes>,
}

impl AssetEncoding {
    /// Build an encoding from ordered chunks, computing its hash and length.
    pub fn from_chunks(content_chunks: Vec<Bytes>, modified_at: OffsetDateTime) -> Self {
        let mut hasher = ContentHash::hasher();
        let mut total_length = 0u64;
        for chunk in &content_chunks {
            hasher.update(chunk);
            total_length += chunk.len() as u64;
        }
        Self {
            modified_at,
            sha256: hasher.finalize(),
            total_length,
            content_chunks,
        }
    }

    /// The whole body as one buffer.
    pub fn body(&self) -> Bytes {
        match self.content_chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let mut buf = BytesMut::with_capacity(self.total_length as usize);
                for chunk in chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }

    /// Copy out `len` bytes starting at `offset`, clamped to the body length.
    pub fn slice(&self, offset: u64, len: u64) -> Bytes {
        let end = offset.saturating_add(len).min(self.total_length);
        if offset >= end {
            return Bytes::new();
        }

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        let mut chunk_start = 0u64;
        for chunk in &self.content_chunks {
            let chunk_end = chunk_start + chunk.len() as u64;
            if chunk_end > offset && chunk_start < end {
                let from = offset.saturating_sub(chunk_start) as usize;
                let to = (end.min(chunk_end) - chunk_start) as usize;
                out.extend_from_slice(&chunk[from..to]);
            }
            if chunk_end >= end {
                break;
            }
            chunk_start = chunk_end;
        }
        out.freeze()
    }

    /// Metadata without the body.
    pub fn summary(&self) -> EncodingSummary {
        EncodingSummary {
            modified_at: self.modified_at,
            sha256: self.sha256,
            total_length: self.total_length,
        }
    }
}

/// A committed asset with every encoding it is served in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub key: AssetKey,
    pub headers: Vec<HeaderField>,
    pub encodings: BTreeMap<EncodingType, AssetEncoding>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Bumped by exactly one on every successful write.
    pub version: u64,
}

impl Asset {
    /// Get the asset as returned by management calls, without bodies.
    pub fn view(&self) -> AssetView {
        AssetView {
            key: self.key.clone(),
            headers: self.headers.clone(),
            encodings: self
                .encodings
                .iter()
                .map(|(encoding, stored)| (*encoding, stored.summary()))
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }

    /// Look up a header set on the asset, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Encoding metadata returned by management calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    pub sha256: ContentHash,
    pub total_length: u64,
}

/// An asset without its content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetView {
    pub key: AssetKey,
    pub headers: Vec<HeaderField>,
    pub encodings: BTreeMap<EncodingType, EncodingSummary>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: u64,
}
