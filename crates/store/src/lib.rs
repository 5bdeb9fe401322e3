//! Certified asset store.
//!
//! This crate provides:
//! - The collection-scoped asset store and its certification index
//! - Chunked uploads and the proposal pipeline
//! - The certified HTTP read path and its client-side verifier
//! - Access guards, custom domains and snapshots
//!
//! [`Depot`] bundles all of it into one instance.

pub mod assets;
pub mod certification;
pub mod collections;
pub mod depot;
pub mod domains;
pub mod error;
pub mod glob;
pub mod guard;
pub mod http;
pub mod proposals;
pub mod reserved;
pub mod snapshot;
pub mod uploads;

pub use assets::{AssetStore, AssetWrite};
pub use certification::{CertificationIndex, CertifiedResponse, MerkleProof, Route};
pub use collections::CollectionRegistry;
pub use depot::{CommitProposal, CommittedUpload, Depot, DepotConfig};
pub use domains::{CustomDomain, CustomDomains};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use guard::{AccessGuard, AllowAll, ControllerGuard, Operation};
pub use http::{
    HttpRequest, HttpResponder, HttpResponse, StreamingCallbackResponse, StreamingCallbackToken,
    StreamingStrategy, VerifyError, verify_response,
};
pub use proposals::{ListProposalsParams, ProposalPipeline, StagedAsset};
pub use reserved::Channel;
pub use snapshot::{DepotSnapshot, load_snapshot, save_snapshot};
pub use uploads::UploadCoordinator;
