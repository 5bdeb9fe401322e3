//! Core domain types for the larder certified asset store.
//!
//! This crate defines the data model shared by the other crates:
//! - Content hashes and encodings
//! - Assets, collections and their rules
//! - Upload batches and chunks
//! - Proposals and their canonical hash
//! - Reserved path classification
//! - Callers, scopes and permissions
//! - Configuration

pub mod access;
pub mod asset;
pub mod certificate;
pub mod codec;
pub mod collection;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod list;
pub mod path;
pub mod proposal;
pub mod upload;

pub use access::{Caller, CallerId, Permission, Scope};
pub use asset::{Asset, AssetEncoding, AssetKey, AssetView, EncodingSummary, HeaderField};
pub use certificate::Certificate;
pub use collection::{DAPP_COLLECTION, RELEASES_COLLECTION, Rule, SetRule};
pub use encoding::EncodingType;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use list::{ListMatcher, ListOrder, ListOrderField, ListPaginate, ListParams, ListResults};
pub use path::{PathClass, Segment};
pub use proposal::{Proposal, ProposalId, ProposalStatus, ProposalType};
pub use upload::{Batch, BatchId, Chunk, ChunkId, CommitBatch, InitAssetKey, UploadChunk};

/// Maximum chunk size: just under 2 MB, so a chunk plus framing fits one message.
pub const MAX_CHUNK_SIZE: u64 = 1_900_000;

/// Slice size for streamed response bodies.
pub const STREAM_CHUNK_SIZE: u64 = 1_900_000;

/// Chunk uploads a client keeps in flight.
pub const DEFAULT_PARALLEL_CHUNKS: u32 = 12;
