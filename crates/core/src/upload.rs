//! Upload batches and chunks.

use crate::asset::{AssetKey, HeaderField};
use crate::encoding::EncodingType;
use crate::proposal::ProposalId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Parse from a decimal string.
            pub fn parse(s: &str) -> $crate::Result<Self> {
                s.parse::<u64>().map(Self).map_err(|e| {
                    $crate::Error::Serialization(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        e
                    ))
                })
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use counter_id;

counter_id!(
    /// Identifier of a pending upload batch.
    BatchId
);

counter_id!(
    /// Identifier of an uploaded chunk.
    ChunkId
);

/// Metadata supplied when opening an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitAssetKey {
    pub collection: String,
    pub full_path: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub encoding_type: Option<EncodingType>,
    #[serde(default)]
    pub token: Option<String>,
}

/// One piece of an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadChunk {
    pub batch_id: BatchId,
    pub content: Bytes,
    /// Position of the chunk in the reassembled body.
    pub order_id: u64,
}

/// Request to seal a batch into an asset encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub batch_id: BatchId,
    /// The chunks that make up the body. Order is taken from their `order_id`.
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub headers: Vec<HeaderField>,
    /// Current version of the asset for direct writes, `None` for a new asset.
    #[serde(default)]
    pub version: Option<u64>,
}

/// A pending upload. Never visible to readers until committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub key: AssetKey,
    pub proposal_id: Option<ProposalId>,
    pub encoding_type: EncodingType,
    /// `order_id` to the chunk currently stored at that position.
    pub chunks: BTreeMap<u64, ChunkId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Bytes received for one position of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub batch_id: BatchId,
    pub order_id: u64,
    #[serde(with = "crate::codec::base64_bytes")]
    pub content: Bytes,
}
