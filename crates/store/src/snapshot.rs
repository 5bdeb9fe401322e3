//! Versioned snapshots of a depot, written atomically to disk.

use crate::domains::CustomDomain;
use crate::error::{StoreError, StoreResult};
use crate::proposals::StagedAsset;
use larder_core::{Asset, Batch, Chunk, Proposal, ProposalId, Rule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

/// Format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Monotonic ID counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub next_batch_id: u64,
    pub next_chunk_id: u64,
    pub next_proposal_id: u64,
}

/// Assets staged under one proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedProposal {
    pub proposal_id: ProposalId,
    pub assets: Vec<StagedAsset>,
}

/// Everything a depot needs to resume where it left off.
///
/// The certification index is not stored; it is rebuilt from the assets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotSnapshot {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    pub counters: Counters,
    pub rules: BTreeMap<String, Rule>,
    pub assets: Vec<Asset>,
    pub batches: Vec<Batch>,
    pub chunks: Vec<Chunk>,
    pub proposals: Vec<Proposal>,
    pub staged: Vec<StagedProposal>,
    pub domains: BTreeMap<String, CustomDomain>,
}

/// Write a snapshot to `path`.
///
/// The document goes to a temporary file in the same directory first, which
/// is synced and then renamed over `path`.
pub async fn save_snapshot(path: &Path, snapshot: &DepotSnapshot) -> StoreResult<()> {
    let json = serde_json::to_vec(snapshot)
        .map_err(|e| StoreError::Snapshot(format!("failed to encode snapshot: {e}")))?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::Snapshot(format!("{} is not a file path", path.display())))?;
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4()
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    tracing::debug!(
        path = %path.display(),
        bytes = json.len(),
        assets = snapshot.assets.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Read a snapshot, or `None` if `path` does not exist.
pub async fn load_snapshot(path: &Path) -> StoreResult<Option<DepotSnapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let snapshot: DepotSnapshot = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Snapshot(format!("failed to decode {}: {e}", path.display())))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::Snapshot(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    Ok(Some(snapshot))
}
