//! One store instance: every component plus the signed certificate.
//!
//! All mutating entry points take `&mut self` and run to completion, so the
//! owner of a `Depot` decides how calls are serialized. Each one asks the
//! access guard first, validates fully, then changes state and re-signs the
//! certification root.

use crate::assets::{AssetStore, AssetWrite};
use crate::certification::CertificationIndex;
use crate::collections::CollectionRegistry;
use crate::domains::{CustomDomain, CustomDomains};
use crate::error::{StoreError, StoreResult};
use crate::guard::{AccessGuard, Operation};
use crate::http::{HttpRequest, HttpResponder, HttpResponse, StreamingCallbackResponse, StreamingCallbackToken};
use crate::proposals::{ListProposalsParams, ProposalPipeline};
use crate::reserved::{self, Channel};
use crate::snapshot::{Counters, DepotSnapshot, SNAPSHOT_VERSION, StagedProposal};
use crate::uploads::UploadCoordinator;
use larder_core::config::{AppConfig, HttpConfig};
use larder_core::path;
use larder_core::{
    AssetKey, AssetView, BatchId, Caller, Certificate, ChunkId, CommitBatch, ContentHash,
    InitAssetKey, ListParams, ListResults, Proposal, ProposalId, ProposalType, Rule, Scope,
    SetRule, UploadChunk,
};
use larder_signer::{PublicKey, Signer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Limits and routing the depot is built with.
#[derive(Clone, Debug)]
pub struct DepotConfig {
    pub max_chunk_size: u64,
    pub stream_chunk_size: u64,
    pub http: HttpConfig,
    /// Rules applied on top of the built-in collections at first start.
    pub collections: BTreeMap<String, SetRule>,
}

impl DepotConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_chunk_size: config.server.max_chunk_size,
            stream_chunk_size: config.server.stream_chunk_size,
            http: config.http.clone(),
            collections: config.collections.clone(),
        }
    }
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Proposal ID and hash presented to commit or reject a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitProposal {
    pub proposal_id: ProposalId,
    pub sha256: ContentHash,
}

/// Where a committed batch ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommittedUpload {
    /// Written to the live asset store.
    Live { asset: AssetView },
    /// Staged under a proposal until it is committed.
    Staged { proposal_id: ProposalId },
}

pub struct Depot {
    config: DepotConfig,
    guard: Arc<dyn AccessGuard>,
    signer: Arc<dyn Signer>,
    collections: CollectionRegistry,
    assets: AssetStore,
    uploads: UploadCoordinator,
    proposals: ProposalPipeline,
    domains: CustomDomains,
    certificate: Certificate,
}

impl Depot {
    /// Create an empty depot holding only the built-in and configured collections.
    pub fn new(
        config: DepotConfig,
        guard: Arc<dyn AccessGuard>,
        signer: Arc<dyn Signer>,
    ) -> StoreResult<Self> {
        let collections = CollectionRegistry::seeded(&config.collections, OffsetDateTime::now_utc())?;
        let index = CertificationIndex::new(config.http.clone(), collections.public_collections());
        let certificate = signer.sign_root(&index.root());
        Ok(Self {
            assets: AssetStore::new(index),
            uploads: UploadCoordinator::new(),
            proposals: ProposalPipeline::new(),
            domains: CustomDomains::new(),
            collections,
            certificate,
            config,
            guard,
            signer,
        })
    }

    /// Rebuild a depot from a snapshot, recertifying every asset.
    pub fn restore(
        config: DepotConfig,
        guard: Arc<dyn AccessGuard>,
        signer: Arc<dyn Signer>,
        snapshot: DepotSnapshot,
    ) -> StoreResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let collections = CollectionRegistry::from_rules(snapshot.rules);
        let index = CertificationIndex::new(config.http.clone(), collections.public_collections());
        let assets = AssetStore::restore(snapshot.assets, index);
        let certificate = signer.sign_root(&assets.certification().root());
        let counters = snapshot.counters;

        tracing::info!(
            assets = assets.len(),
            proposals = snapshot.proposals.len(),
            batches = snapshot.batches.len(),
            taken_at = %snapshot.taken_at,
            "Depot restored from snapshot"
        );

        Ok(Self {
            uploads: UploadCoordinator::restore(
                counters.next_batch_id,
                counters.next_chunk_id,
                snapshot.batches,
                snapshot.chunks,
            ),
            proposals: ProposalPipeline::restore(
                counters.next_proposal_id,
                snapshot.proposals,
                snapshot
                    .staged
                    .into_iter()
                    .map(|staged| (staged.proposal_id, staged.assets))
                    .collect(),
            ),
            domains: CustomDomains::from_domains(snapshot.domains),
            collections,
            assets,
            certificate,
            config,
            guard,
            signer,
        })
    }

    /// Capture all state.
    pub fn snapshot(&self) -> DepotSnapshot {
        let (next_batch_id, next_chunk_id) = self.uploads.counters();
        DepotSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: OffsetDateTime::now_utc(),
            counters: Counters {
                next_batch_id,
                next_chunk_id,
                next_proposal_id: self.proposals.next_id(),
            },
            rules: self.collections.rules().clone(),
            assets: self.assets.iter().cloned().collect(),
            batches: self.uploads.batches().cloned().collect(),
            chunks: self.uploads.chunks().cloned().collect(),
            proposals: self.proposals.iter().cloned().collect(),
            staged: self
                .proposals
                .staged_snapshot()
                .into_iter()
                .map(|(proposal_id, assets)| StagedProposal {
                    proposal_id,
                    assets,
                })
                .collect(),
            domains: self.domains.list().clone(),
        }
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    /// The certificate over the current certification root.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn public_key(&self) -> &PublicKey {
        self.signer.public_key()
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    // Uploads

    /// Open a batch for one encoding of an asset, directly or under a proposal.
    #[tracing::instrument(skip(self, caller, key), fields(caller = %caller.id, full_path = %key.full_path))]
    pub fn init_asset_upload(
        &mut self,
        caller: &Caller,
        key: InitAssetKey,
        proposal_id: Option<ProposalId>,
    ) -> StoreResult<BatchId> {
        self.guard.check(caller, Operation::Upload)?;
        let rule = self.collections.get(&key.collection)?;

        let channel = match proposal_id {
            Some(id) => {
                if !caller.has_scope(Scope::Write) {
                    return Err(StoreError::PermissionDenied(
                        "staging under a proposal requires write scope".to_string(),
                    ));
                }
                let proposal = self.proposals.accepting(id)?;
                let target = proposal.proposal_type.target_collection();
                if key.collection != target {
                    return Err(StoreError::Validation(format!(
                        "proposal {id} stages into {target}, not {}",
                        key.collection
                    )));
                }
                Channel::Proposal {
                    caller,
                    proposal_type: &proposal.proposal_type,
                }
            }
            None => {
                if rule.proposal_required {
                    return Err(StoreError::Validation(format!(
                        "collection {} only accepts uploads through a proposal",
                        key.collection
                    )));
                }
                Channel::Direct { caller }
            }
        };
        reserved::check_write(&key.full_path, &key.collection, channel)?;

        let existing = self.assets.get(&key.collection, &key.full_path);
        if !rule.write.allows(caller, existing.map(|asset| &asset.key.owner)) {
            return Err(StoreError::PermissionDenied(format!(
                "cannot write {} in {}",
                key.full_path, key.collection
            )));
        }

        let encoding_type = key.encoding_type.unwrap_or_default();
        let asset_key = AssetKey {
            full_path: key.full_path,
            collection: key.collection,
            owner: caller.id.clone(),
            token: key.token,
            name: key.name,
            description: key.description,
        };
        let batch_id = self.uploads.init(
            asset_key,
            encoding_type,
            proposal_id,
            OffsetDateTime::now_utc(),
        );
        tracing::debug!(batch_id = %batch_id, encoding = %encoding_type, "Upload batch opened");
        Ok(batch_id)
    }

    /// Store one chunk of a batch.
    pub fn upload_asset_chunk(&mut self, caller: &Caller, chunk: UploadChunk) -> StoreResult<ChunkId> {
        self.guard.check(caller, Operation::Upload)?;
        self.uploads.upload_chunk(
            chunk.batch_id,
            chunk.order_id,
            chunk.content,
            &caller.id,
            self.config.max_chunk_size,
            OffsetDateTime::now_utc(),
        )
    }

    /// Seal a batch. Direct batches become live; proposal batches are staged.
    #[tracing::instrument(skip(self, caller, commit), fields(caller = %caller.id, batch_id = %commit.batch_id))]
    pub fn commit_asset_upload(
        &mut self,
        caller: &Caller,
        commit: CommitBatch,
    ) -> StoreResult<CommittedUpload> {
        self.guard.check(caller, Operation::Upload)?;
        let now = OffsetDateTime::now_utc();

        let batch = self.uploads.get(commit.batch_id)?;
        let rule = self.collections.get(&batch.key.collection)?;
        let prepared = self.uploads.prepare_commit(
            commit.batch_id,
            &commit.chunk_ids,
            &caller.id,
            rule.max_size,
            now,
        )?;
        let batch = prepared.batch;
        let class = path::classify(&batch.key.full_path)?;
        reserved::check_content(&class, &prepared.encoding.body())?;

        let committed = match batch.proposal_id {
            Some(proposal_id) => {
                self.proposals.stage(
                    proposal_id,
                    batch.key,
                    commit.headers,
                    batch.encoding_type,
                    prepared.encoding,
                )?;
                CommittedUpload::Staged { proposal_id }
            }
            None => {
                let existing = self.assets.get(&batch.key.collection, &batch.key.full_path);
                if !rule.write.allows(caller, existing.map(|asset| &asset.key.owner)) {
                    return Err(StoreError::PermissionDenied(format!(
                        "cannot write {} in {}",
                        batch.key.full_path, batch.key.collection
                    )));
                }
                let asset = self.assets.put(
                    AssetWrite {
                        key: batch.key,
                        headers: commit.headers,
                        encoding_type: batch.encoding_type,
                        encoding: prepared.encoding,
                        expected_version: commit.version,
                    },
                    Channel::Direct { caller },
                    now,
                )?;
                self.recertify();
                tracing::info!(version = asset.version, "Asset committed");
                CommittedUpload::Live {
                    asset: asset.view(),
                }
            }
        };

        self.uploads.finish(commit.batch_id);
        Ok(committed)
    }

    // Proposals

    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn init_proposal(
        &mut self,
        caller: &Caller,
        proposal_type: ProposalType,
    ) -> StoreResult<(ProposalId, Proposal)> {
        self.guard.check(caller, Operation::Proposal)?;
        let proposal = self
            .proposals
            .init(proposal_type, caller.id.clone(), OffsetDateTime::now_utc())?;
        Ok((proposal.id, proposal))
    }

    /// Freeze a proposal's staged set. Returns the new proposal version.
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn submit_proposal(
        &mut self,
        caller: &Caller,
        proposal_id: ProposalId,
    ) -> StoreResult<(u64, Proposal)> {
        self.guard.check(caller, Operation::Proposal)?;
        let proposal = self.proposals.submit(proposal_id, OffsetDateTime::now_utc())?;
        Ok((proposal.version, proposal))
    }

    #[tracing::instrument(skip(self, caller, commit), fields(caller = %caller.id, proposal_id = %commit.proposal_id))]
    pub fn commit_proposal(&mut self, caller: &Caller, commit: CommitProposal) -> StoreResult<Proposal> {
        self.guard.check(caller, Operation::Proposal)?;
        let outcome = self.proposals.commit(
            commit.proposal_id,
            &commit.sha256,
            &mut self.assets,
            &mut self.uploads,
            OffsetDateTime::now_utc(),
        )?;
        self.recertify();
        Ok(outcome.proposal)
    }

    #[tracing::instrument(skip(self, caller, reject), fields(caller = %caller.id, proposal_id = %reject.proposal_id))]
    pub fn reject_proposal(&mut self, caller: &Caller, reject: CommitProposal) -> StoreResult<Proposal> {
        self.guard.check(caller, Operation::Proposal)?;
        self.proposals.reject(
            reject.proposal_id,
            &reject.sha256,
            &mut self.uploads,
            OffsetDateTime::now_utc(),
        )
    }

    /// Drop staged assets and open batches of the given proposals.
    pub fn delete_proposal_assets(
        &mut self,
        caller: &Caller,
        proposal_ids: &[ProposalId],
    ) -> StoreResult<usize> {
        self.guard.check(caller, Operation::Proposal)?;
        self.proposals.delete_assets(proposal_ids, &mut self.uploads)
    }

    pub fn get_proposal(&self, proposal_id: ProposalId) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    pub fn list_proposals(&self, params: &ListProposalsParams) -> Vec<Proposal> {
        self.proposals.list(params)
    }

    pub fn count_proposals(&self) -> usize {
        self.proposals.count()
    }

    /// Hash a proposal would be submitted with, from what is staged now.
    pub fn staged_hash(&self, proposal_id: ProposalId) -> StoreResult<ContentHash> {
        self.proposals.staged_hash(proposal_id)
    }

    // Read path

    pub fn http_request(&self, request: &HttpRequest) -> HttpResponse {
        self.responder().respond(request)
    }

    pub fn http_request_streaming_callback(
        &self,
        token: &StreamingCallbackToken,
    ) -> StoreResult<StreamingCallbackResponse> {
        self.responder().stream(token)
    }

    fn responder(&self) -> HttpResponder<'_> {
        HttpResponder::new(&self.assets, &self.certificate, self.config.stream_chunk_size)
    }

    // Asset management

    pub fn get_asset(
        &self,
        caller: &Caller,
        collection: &str,
        full_path: &str,
    ) -> StoreResult<Option<AssetView>> {
        let rule = self.collections.get(collection)?;
        Ok(self
            .assets
            .get(collection, full_path)
            .filter(|asset| rule.read.allows(caller, Some(&asset.key.owner)))
            .map(|asset| asset.view()))
    }

    pub fn list_assets(
        &self,
        caller: &Caller,
        collection: &str,
        params: &ListParams,
    ) -> StoreResult<ListResults<AssetView>> {
        let rule = self.collections.get(collection)?;
        Ok(self.assets.list(collection, params, rule, caller))
    }

    pub fn count_assets(&self, caller: &Caller, collection: &str, params: &ListParams) -> StoreResult<usize> {
        let rule = self.collections.get(collection)?;
        Ok(self.assets.count(collection, params, rule, caller))
    }

    /// Delete one asset. `version`, when given, must match the current one.
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn del_asset(
        &mut self,
        caller: &Caller,
        collection: &str,
        full_path: &str,
        version: Option<u64>,
    ) -> StoreResult<()> {
        self.guard.check(caller, Operation::DeleteAsset)?;
        let rule = self.collections.get(collection)?;
        let asset = self
            .assets
            .get(collection, full_path)
            .ok_or_else(|| StoreError::NoAssetFound {
                collection: collection.to_string(),
                full_path: full_path.to_string(),
            })?;
        if !rule.write.allows(caller, Some(&asset.key.owner)) {
            return Err(StoreError::PermissionDenied(format!(
                "cannot delete {full_path} in {collection}"
            )));
        }
        self.assets
            .delete(collection, full_path, version, Channel::Direct { caller })?;
        self.recertify();
        Ok(())
    }

    /// Delete every non-reserved asset of a collection the caller may write.
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn del_assets(&mut self, caller: &Caller, collection: &str) -> StoreResult<usize> {
        self.guard.check(caller, Operation::DeleteAssets)?;
        let rule = self.collections.get(collection)?;
        let removed = self
            .assets
            .delete_filtered(collection, &ListParams::default(), rule, caller);
        self.recertify();
        tracing::info!(removed, "Collection cleared");
        Ok(removed)
    }

    #[tracing::instrument(skip(self, caller, params), fields(caller = %caller.id))]
    pub fn del_filtered_assets(
        &mut self,
        caller: &Caller,
        collection: &str,
        params: &ListParams,
    ) -> StoreResult<usize> {
        self.guard.check(caller, Operation::DeleteAssets)?;
        let rule = self.collections.get(collection)?;
        let removed = self.assets.delete_filtered(collection, params, rule, caller);
        self.recertify();
        Ok(removed)
    }

    #[tracing::instrument(skip(self, caller, full_paths), fields(caller = %caller.id, count = full_paths.len()))]
    pub fn del_many_assets(
        &mut self,
        caller: &Caller,
        collection: &str,
        full_paths: &[String],
    ) -> StoreResult<usize> {
        self.guard.check(caller, Operation::DeleteAssets)?;
        let rule = self.collections.get(collection)?;
        let removed = self.assets.delete_many(collection, full_paths, rule, caller)?;
        self.recertify();
        Ok(removed)
    }

    // Collections

    #[tracing::instrument(skip(self, caller, rule), fields(caller = %caller.id))]
    pub fn set_rule(&mut self, caller: &Caller, collection: &str, rule: SetRule) -> StoreResult<Rule> {
        self.guard.check(caller, Operation::Rules)?;
        let rule = self
            .collections
            .set(collection, rule, OffsetDateTime::now_utc())?;
        self.assets
            .set_public_collections(self.collections.public_collections());
        self.recertify();
        Ok(rule)
    }

    pub fn list_rules(&self) -> &BTreeMap<String, Rule> {
        self.collections.rules()
    }

    pub fn get_rule(&self, collection: &str) -> StoreResult<&Rule> {
        self.collections.get(collection)
    }

    // Custom domains

    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn set_custom_domain(
        &mut self,
        caller: &Caller,
        domain: &str,
        bn_id: Option<String>,
    ) -> StoreResult<CustomDomain> {
        self.guard.check(caller, Operation::Domains)?;
        let entry = self
            .domains
            .set(domain, bn_id, &mut self.assets, OffsetDateTime::now_utc())?;
        self.recertify();
        Ok(entry)
    }

    #[tracing::instrument(skip(self, caller), fields(caller = %caller.id))]
    pub fn delete_custom_domain(&mut self, caller: &Caller, domain: &str) -> StoreResult<CustomDomain> {
        self.guard.check(caller, Operation::Domains)?;
        let removed = self
            .domains
            .delete(domain, &mut self.assets, OffsetDateTime::now_utc())?;
        self.recertify();
        Ok(removed)
    }

    pub fn list_custom_domains(&self) -> &BTreeMap<String, CustomDomain> {
        self.domains.list()
    }

    // Housekeeping

    /// Drop upload batches not touched since `cutoff`. Returns the number dropped.
    pub fn delete_stale_batches(&mut self, cutoff: OffsetDateTime) -> usize {
        let removed = self.uploads.delete_stale(cutoff);
        if removed > 0 {
            tracing::info!(removed, "Stale upload batches purged");
        }
        removed
    }

    /// Re-sign the certification root if it moved.
    fn recertify(&mut self) {
        let root = self.assets.certification().root();
        if root != self.certificate.root {
            self.certificate = self.signer.sign_root(&root);
        }
    }
}
