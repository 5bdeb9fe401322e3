//! Depot fixtures and upload helpers.

use bytes::Bytes;
use larder_core::{
    Caller, CommitBatch, EncodingType, InitAssetKey, Permission, ProposalId, Scope, SetRule,
    UploadChunk,
};
use larder_signer::CertificateSigner;
use larder_store::{CommittedUpload, ControllerGuard, Depot, DepotConfig, StoreResult};
use std::sync::Arc;

/// A public collection that takes direct uploads.
pub const IMAGES: &str = "images";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

#[allow(dead_code)]
pub fn admin() -> Caller {
    Caller::controller("admin", Scope::Admin)
}

#[allow(dead_code)]
pub fn writer() -> Caller {
    Caller::controller("ci", Scope::Write)
}

#[allow(dead_code)]
pub fn test_config() -> DepotConfig {
    let mut config = DepotConfig::default();
    config.collections.insert(
        IMAGES.to_string(),
        SetRule {
            read: Permission::Public,
            write: Permission::Controllers,
            max_size: None,
            proposal_required: false,
            version: None,
        },
    );
    config
}

/// A depot with the scope-checking guard and a fresh signing key.
#[allow(dead_code)]
pub fn test_depot() -> (Depot, Arc<CertificateSigner>) {
    depot_with(test_config())
}

#[allow(dead_code)]
pub fn depot_with(config: DepotConfig) -> (Depot, Arc<CertificateSigner>) {
    let signer = Arc::new(CertificateSigner::generate("test-1"));
    let depot = Depot::new(config, Arc::new(ControllerGuard::unlimited()), signer.clone())
        .expect("depot");
    (depot, signer)
}

#[allow(dead_code)]
pub fn init_key(collection: &str, full_path: &str, encoding: EncodingType) -> InitAssetKey {
    InitAssetKey {
        collection: collection.to_string(),
        full_path: full_path.to_string(),
        name: full_path.rsplit('/').next().unwrap_or_default().to_string(),
        description: None,
        encoding_type: Some(encoding),
        token: None,
    }
}

/// Upload `body` in `chunk_size` pieces and commit it.
#[allow(dead_code)]
pub fn upload(
    depot: &mut Depot,
    caller: &Caller,
    key: InitAssetKey,
    proposal_id: Option<ProposalId>,
    body: &[u8],
    chunk_size: usize,
    version: Option<u64>,
) -> StoreResult<CommittedUpload> {
    let batch_id = depot.init_asset_upload(caller, key, proposal_id)?;
    let mut chunk_ids = Vec::new();
    for (order_id, piece) in body.chunks(chunk_size.max(1)).enumerate() {
        chunk_ids.push(depot.upload_asset_chunk(
            caller,
            UploadChunk {
                batch_id,
                content: Bytes::copy_from_slice(piece),
                order_id: order_id as u64,
            },
        )?);
    }
    depot.commit_asset_upload(
        caller,
        CommitBatch {
            batch_id,
            chunk_ids,
            headers: Vec::new(),
            version,
        },
    )
}
