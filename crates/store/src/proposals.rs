//! Proposal state machine and staged assets.
//!
//! `Initialized -> Open -> {Executed, Failed}` and `Open -> Rejected`.
//! Staged uploads are held here, outside the live asset store, until a
//! commit merges them in one step.

use crate::assets::AssetStore;
use crate::error::{StoreError, StoreResult};
use crate::uploads::UploadCoordinator;
use larder_core::proposal::{StagedEntry, proposal_hash};
use larder_core::{
    AssetEncoding, AssetKey, CallerId, ContentHash, EncodingType, HeaderField, Proposal,
    ProposalId, ProposalStatus, ProposalType,
};
use larder_core::path::{self, PathClass};
use larder_core::list::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

/// An asset staged under a proposal, with every encoding committed so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedAsset {
    pub key: AssetKey,
    pub headers: Vec<HeaderField>,
    pub encodings: BTreeMap<EncodingType, AssetEncoding>,
}

/// Filters and paging for proposal listings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListProposalsParams {
    #[serde(default)]
    pub status: Option<ProposalStatus>,
    /// Newest first.
    #[serde(default)]
    pub desc: bool,
    /// Last proposal ID of the previous page.
    #[serde(default)]
    pub start_after: Option<ProposalId>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Outcome of a commit attempt that reached a terminal state.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    pub proposal: Proposal,
    /// Paths whose live state changed.
    pub affected: Vec<String>,
}

/// All proposals of a store and their staged assets.
#[derive(Debug, Default)]
pub struct ProposalPipeline {
    next_id: u64,
    proposals: BTreeMap<ProposalId, Proposal>,
    staged: BTreeMap<ProposalId, BTreeMap<String, StagedAsset>>,
}

impl ProposalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from snapshotted state.
    pub fn restore(
        next_id: u64,
        proposals: Vec<Proposal>,
        staged: Vec<(ProposalId, Vec<StagedAsset>)>,
    ) -> Self {
        Self {
            next_id,
            proposals: proposals.into_iter().map(|p| (p.id, p)).collect(),
            staged: staged
                .into_iter()
                .map(|(id, assets)| {
                    let assets = assets
                        .into_iter()
                        .map(|asset| (asset.key.full_path.clone(), asset))
                        .collect();
                    (id, assets)
                })
                .collect(),
        }
    }

    /// Create a proposal owned by `owner`.
    pub fn init(
        &mut self,
        proposal_type: ProposalType,
        owner: CallerId,
        now: OffsetDateTime,
    ) -> StoreResult<Proposal> {
        proposal_type.validate()?;
        self.next_id += 1;
        let proposal = Proposal::new(ProposalId::new(self.next_id), proposal_type, owner, now);
        self.proposals.insert(proposal.id, proposal.clone());
        tracing::info!(proposal_id = %proposal.id, "Proposal initialized");
        Ok(proposal)
    }

    pub fn get(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    /// A proposal that still accepts uploads.
    pub fn accepting(&self, id: ProposalId) -> StoreResult<&Proposal> {
        self.proposals
            .get(&id)
            .filter(|proposal| proposal.status.accepts_uploads())
            .ok_or(StoreError::NoProposalFound(id))
    }

    /// Stage one encoding of an asset under a proposal.
    ///
    /// Staging another encoding of the same path adds to the staged asset;
    /// an identity encoding starts its encoding set over.
    pub fn stage(
        &mut self,
        id: ProposalId,
        key: AssetKey,
        headers: Vec<HeaderField>,
        encoding_type: EncodingType,
        encoding: AssetEncoding,
    ) -> StoreResult<()> {
        self.accepting(id)?;

        let staged = self.staged.entry(id).or_default();
        let entry = staged
            .entry(key.full_path.clone())
            .or_insert_with(|| StagedAsset {
                key: key.clone(),
                headers: Vec::new(),
                encodings: BTreeMap::new(),
            });
        if encoding_type == EncodingType::Identity {
            entry.encodings.clear();
        }
        entry.key = key;
        entry.headers = headers;
        entry.encodings.insert(encoding_type, encoding);
        Ok(())
    }

    /// Assets staged under a proposal.
    pub fn staged(&self, id: ProposalId) -> impl Iterator<Item = &StagedAsset> {
        self.staged.get(&id).into_iter().flat_map(|assets| assets.values())
    }

    /// Canonical hash of what is currently staged under a proposal.
    pub fn staged_hash(&self, id: ProposalId) -> StoreResult<ContentHash> {
        let proposal = self
            .proposals
            .get(&id)
            .ok_or(StoreError::NoProposalFound(id))?;
        let entries = self.staged(id).flat_map(|asset| {
            asset.encodings.iter().map(|(encoding, stored)| StagedEntry {
                full_path: &asset.key.full_path,
                encoding: *encoding,
                sha256: stored.sha256,
            })
        });
        Ok(proposal_hash(
            entries,
            proposal.proposal_type.clears_existing(),
        ))
    }

    /// Freeze the staged set: compute its hash and open the proposal.
    pub fn submit(&mut self, id: ProposalId, now: OffsetDateTime) -> StoreResult<Proposal> {
        let proposal = self
            .proposals
            .get(&id)
            .ok_or(StoreError::NoProposalFound(id))?;
        if proposal.status != ProposalStatus::Initialized {
            return Err(StoreError::CannotSubmit(proposal.status));
        }
        self.check_release_set(proposal)?;

        let sha256 = self.staged_hash(id)?;
        let proposal = self.transition(id, ProposalStatus::Open, now)?;
        proposal.sha256 = Some(sha256);
        tracing::info!(proposal_id = %id, sha256 = %sha256.to_hex(), "Proposal submitted");
        Ok(proposal.clone())
    }

    /// Apply a proposal to the asset store.
    ///
    /// A hash mismatch or an empty staged set moves the proposal to `Failed`
    /// and returns the error; the asset store is left untouched.
    pub fn commit(
        &mut self,
        id: ProposalId,
        sha256: &ContentHash,
        assets: &mut AssetStore,
        uploads: &mut UploadCoordinator,
        now: OffsetDateTime,
    ) -> StoreResult<CommitOutcome> {
        let proposal = self
            .proposals
            .get(&id)
            .ok_or(StoreError::NoProposalFound(id))?;
        if proposal.status != ProposalStatus::Open {
            return Err(StoreError::CannotCommit(proposal.status));
        }

        if let Err(err) = self.check_commit(proposal, sha256) {
            self.terminate(id, ProposalStatus::Failed, uploads, now)?;
            tracing::warn!(proposal_id = %id, error = %err, "Proposal failed");
            return Err(err);
        }

        let collection = proposal.proposal_type.target_collection();
        let clear = proposal.proposal_type.clears_existing();
        let staged: Vec<StagedAsset> = self.staged(id).cloned().collect();
        let affected = match assets.apply_staged(collection, clear, staged, now) {
            Ok(affected) => affected,
            Err(err) => {
                self.terminate(id, ProposalStatus::Failed, uploads, now)?;
                tracing::warn!(proposal_id = %id, error = %err, "Proposal failed while merging");
                return Err(err);
            }
        };

        let proposal = self.terminate(id, ProposalStatus::Executed, uploads, now)?;
        tracing::info!(
            proposal_id = %id,
            assets = affected.len(),
            "Proposal executed"
        );
        Ok(CommitOutcome { proposal, affected })
    }

    /// Discard a proposal's staged data. The hash must match the submitted one.
    pub fn reject(
        &mut self,
        id: ProposalId,
        sha256: &ContentHash,
        uploads: &mut UploadCoordinator,
        now: OffsetDateTime,
    ) -> StoreResult<Proposal> {
        let proposal = self
            .proposals
            .get(&id)
            .ok_or(StoreError::NoProposalFound(id))?;
        if proposal.status != ProposalStatus::Open {
            return Err(StoreError::CannotReject(proposal.status));
        }
        check_hash(proposal, sha256)?;

        let proposal = self.terminate(id, ProposalStatus::Rejected, uploads, now)?;
        tracing::info!(proposal_id = %id, "Proposal rejected");
        Ok(proposal)
    }

    /// Drop the staged assets and open batches of proposals.
    ///
    /// Proposals that still accept uploads keep their status and can be
    /// staged into again. Returns the number of staged assets dropped.
    pub fn delete_assets(
        &mut self,
        ids: &[ProposalId],
        uploads: &mut UploadCoordinator,
    ) -> StoreResult<usize> {
        if let Some(missing) = ids.iter().find(|id| !self.proposals.contains_key(id)) {
            return Err(StoreError::NoProposalFound(*missing));
        }
        let mut dropped = 0;
        for id in ids {
            dropped += self.staged.remove(id).map_or(0, |assets| assets.len());
            uploads.purge_proposal(*id);
        }
        Ok(dropped)
    }

    /// One page of proposals.
    pub fn list(&self, params: &ListProposalsParams) -> Vec<Proposal> {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let matching = self
            .proposals
            .values()
            .filter(|p| params.status.is_none_or(|status| p.status == status));

        let page: Vec<&Proposal> = match (params.desc, params.start_after) {
            (false, Some(after)) => matching.filter(|p| p.id > after).take(limit).collect(),
            (false, None) => matching.take(limit).collect(),
            (true, Some(after)) => matching.rev().filter(|p| p.id < after).take(limit).collect(),
            (true, None) => matching.rev().take(limit).collect(),
        };
        page.into_iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.proposals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    /// Staged assets of every proposal, for snapshots.
    pub fn staged_snapshot(&self) -> Vec<(ProposalId, Vec<StagedAsset>)> {
        self.staged
            .iter()
            .map(|(id, assets)| (*id, assets.values().cloned().collect()))
            .collect()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    fn check_commit(&self, proposal: &Proposal, sha256: &ContentHash) -> StoreResult<()> {
        check_hash(proposal, sha256)?;

        // Uploads into an open proposal change what would be applied.
        let current = self.staged_hash(proposal.id)?;
        if proposal.sha256 != Some(current) {
            return Err(StoreError::Integrity {
                expected: sha256.to_hex(),
                actual: current.to_hex(),
            });
        }

        if self.staged(proposal.id).next().is_none() {
            return Err(StoreError::EmptyAssets(proposal.id));
        }
        Ok(())
    }

    /// A segments deployment must stage exactly the artifacts it names.
    fn check_release_set(&self, proposal: &Proposal) -> StoreResult<()> {
        let ProposalType::SegmentsDeployment { segments } = &proposal.proposal_type else {
            return Ok(());
        };
        let mut published = BTreeSet::new();
        for asset in self.staged(proposal.id) {
            let full_path = &asset.key.full_path;
            let Ok(PathClass::Release(artifact)) = path::classify(full_path) else {
                return Err(StoreError::Validation(format!(
                    "{full_path} is not a release artifact"
                )));
            };
            if segments.get(&artifact.segment) != Some(&artifact.version) {
                return Err(StoreError::Validation(format!(
                    "{full_path} is not part of this deployment"
                )));
            }
            published.insert((artifact.segment, artifact.version));
        }
        if let Some((segment, version)) = segments
            .iter()
            .find(|(segment, version)| !published.contains(&(**segment, (*version).clone())))
        {
            return Err(StoreError::Validation(format!(
                "no artifact staged for {segment} {version}"
            )));
        }
        Ok(())
    }

    fn transition(
        &mut self,
        id: ProposalId,
        next: ProposalStatus,
        now: OffsetDateTime,
    ) -> StoreResult<&mut Proposal> {
        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or(StoreError::NoProposalFound(id))?;
        proposal.transition(next, now)?;
        Ok(proposal)
    }

    fn terminate(
        &mut self,
        id: ProposalId,
        status: ProposalStatus,
        uploads: &mut UploadCoordinator,
        now: OffsetDateTime,
    ) -> StoreResult<Proposal> {
        let proposal = self.transition(id, status, now)?.clone();
        self.staged.remove(&id);
        uploads.purge_proposal(id);
        Ok(proposal)
    }
}

fn check_hash(proposal: &Proposal, sha256: &ContentHash) -> StoreResult<()> {
    match proposal.sha256 {
        Some(expected) if expected == *sha256 => Ok(()),
        expected => Err(StoreError::Integrity {
            expected: expected.map(|h| h.to_hex()).unwrap_or_default(),
            actual: sha256.to_hex(),
        }),
    }
}
