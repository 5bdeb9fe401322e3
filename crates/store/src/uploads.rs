//! Pending upload batches and their chunks.
//!
//! A batch collects chunks for exactly one asset encoding. Chunks are keyed
//! by `order_id`, so they can arrive in any order and be re-sent; the bytes
//! are concatenated sorted by `order_id` when the batch is committed.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use larder_core::{
    AssetEncoding, AssetKey, Batch, BatchId, CallerId, Chunk, ChunkId, EncodingType, ProposalId,
};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

/// A batch ready to be merged, with its reassembled encoding.
#[derive(Clone, Debug)]
pub struct PreparedCommit {
    pub batch: Batch,
    pub encoding: AssetEncoding,
}

/// Batches and chunks that have not been committed yet.
#[derive(Debug, Default)]
pub struct UploadCoordinator {
    next_batch_id: u64,
    next_chunk_id: u64,
    batches: BTreeMap<BatchId, Batch>,
    chunks: BTreeMap<ChunkId, Chunk>,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from snapshotted state.
    pub fn restore(
        next_batch_id: u64,
        next_chunk_id: u64,
        batches: Vec<Batch>,
        chunks: Vec<Chunk>,
    ) -> Self {
        Self {
            next_batch_id,
            next_chunk_id,
            batches: batches.into_iter().map(|b| (b.id, b)).collect(),
            chunks: chunks.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    /// Open a batch for one encoding of `key`.
    pub fn init(
        &mut self,
        key: AssetKey,
        encoding_type: EncodingType,
        proposal_id: Option<ProposalId>,
        now: OffsetDateTime,
    ) -> BatchId {
        self.next_batch_id += 1;
        let id = BatchId::new(self.next_batch_id);
        self.batches.insert(
            id,
            Batch {
                id,
                key,
                proposal_id,
                encoding_type,
                chunks: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn get(&self, batch_id: BatchId) -> StoreResult<&Batch> {
        self.batches
            .get(&batch_id)
            .ok_or(StoreError::NoBatchFound(batch_id))
    }

    /// Store one chunk. Re-sending an `order_id` replaces its bytes and
    /// returns the same chunk ID.
    pub fn upload_chunk(
        &mut self,
        batch_id: BatchId,
        order_id: u64,
        content: Bytes,
        uploader: &CallerId,
        max_chunk_size: u64,
        now: OffsetDateTime,
    ) -> StoreResult<ChunkId> {
        let size = content.len() as u64;
        if size > max_chunk_size {
            return Err(StoreError::ChunkTooLarge {
                size,
                max: max_chunk_size,
            });
        }

        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(StoreError::NoBatchFound(batch_id))?;
        check_uploader(batch, uploader)?;

        let chunk_id = match batch.chunks.get(&order_id) {
            Some(existing) => *existing,
            None => {
                self.next_chunk_id += 1;
                let chunk_id = ChunkId::new(self.next_chunk_id);
                batch.chunks.insert(order_id, chunk_id);
                chunk_id
            }
        };
        batch.updated_at = now;

        self.chunks.insert(
            chunk_id,
            Chunk {
                id: chunk_id,
                batch_id,
                order_id,
                content,
            },
        );
        Ok(chunk_id)
    }

    /// Validate a commit and reassemble its bytes without consuming the batch.
    pub fn prepare_commit(
        &self,
        batch_id: BatchId,
        chunk_ids: &[ChunkId],
        committer: &CallerId,
        max_size: Option<u64>,
        now: OffsetDateTime,
    ) -> StoreResult<PreparedCommit> {
        let batch = self.get(batch_id)?;
        check_uploader(batch, committer)?;

        if chunk_ids.is_empty() {
            return Err(StoreError::Validation(format!(
                "batch {batch_id} commit names no chunks"
            )));
        }

        let mut seen = BTreeSet::new();
        let mut ordered: Vec<&Chunk> = Vec::with_capacity(chunk_ids.len());
        for chunk_id in chunk_ids {
            if !seen.insert(*chunk_id) {
                return Err(StoreError::Validation(format!(
                    "chunk {chunk_id} listed twice"
                )));
            }
            let chunk = self
                .chunks
                .get(chunk_id)
                .ok_or(StoreError::NoChunkFound(*chunk_id))?;
            if chunk.batch_id != batch_id {
                return Err(StoreError::Validation(format!(
                    "chunk {chunk_id} does not belong to batch {batch_id}"
                )));
            }
            ordered.push(chunk);
        }
        ordered.sort_by_key(|chunk| chunk.order_id);

        let encoding = AssetEncoding::from_chunks(
            ordered.iter().map(|chunk| chunk.content.clone()).collect(),
            now,
        );
        if let Some(max) = max_size
            && encoding.total_length > max
        {
            return Err(StoreError::AssetTooLarge {
                size: encoding.total_length,
                max,
            });
        }

        Ok(PreparedCommit {
            batch: batch.clone(),
            encoding,
        })
    }

    /// Drop a batch and its chunks.
    pub fn finish(&mut self, batch_id: BatchId) -> Option<Batch> {
        let batch = self.batches.remove(&batch_id)?;
        for chunk_id in batch.chunks.values() {
            self.chunks.remove(chunk_id);
        }
        Some(batch)
    }

    /// Drop every batch opened under a proposal. Returns the number dropped.
    pub fn purge_proposal(&mut self, proposal_id: ProposalId) -> usize {
        self.purge_where(|batch| batch.proposal_id == Some(proposal_id))
    }

    /// Drop batches not touched since `cutoff`. Returns the number dropped.
    pub fn delete_stale(&mut self, cutoff: OffsetDateTime) -> usize {
        self.purge_where(|batch| batch.updated_at < cutoff)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Counter values, for snapshots.
    pub fn counters(&self) -> (u64, u64) {
        (self.next_batch_id, self.next_chunk_id)
    }

    fn purge_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Batch) -> bool,
    {
        let ids: Vec<BatchId> = self
            .batches
            .values()
            .filter(|batch| predicate(batch))
            .map(|batch| batch.id)
            .collect();
        for id in &ids {
            self.finish(*id);
        }
        ids.len()
    }
}

/// Anonymous callers share one id; they only open batches in collections
/// whose write permission is public.
fn check_uploader(batch: &Batch, caller: &CallerId) -> StoreResult<()> {
    if &batch.key.owner != caller {
        return Err(StoreError::PermissionDenied(format!(
            "batch {} was opened by another caller",
            batch.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::ContentHash;

    const MAX: u64 = 1024;

    fn owner() -> CallerId {
        CallerId::new("ci")
    }

    fn key() -> AssetKey {
        AssetKey {
            full_path: "/app.js".to_string(),
            collection: "#dapp".to_string(),
            owner: owner(),
            token: None,
            name: "app.js".to_string(),
            description: None,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn test_chunks_reassemble_by_order_id() {
        let mut uploads = UploadCoordinator::new();
        let batch = uploads.init(key(), EncodingType::Identity, None, now());

        let second = uploads
            .upload_chunk(batch, 1, Bytes::from_static(b"world"), &owner(), MAX, now())
            .unwrap();
        let first = uploads
            .upload_chunk(batch, 0, Bytes::from_static(b"hello "), &owner(), MAX, now())
            .unwrap();

        let prepared = uploads
            .prepare_commit(batch, &[second, first], &owner(), None, now())
            .unwrap();
        assert_eq!(prepared.encoding.body(), Bytes::from_static(b"hello world"));
        assert_eq!(prepared.encoding.sha256, ContentHash::compute(b"hello world"));
        assert_eq!(prepared.encoding.total_length, 11);
    }

    #[test]
    fn test_same_order_id_is_idempotent() {
        let mut uploads = UploadCoordinator::new();
        let batch = uploads.init(key(), EncodingType::Identity, None, now());

        let a = uploads
            .upload_chunk(batch, 0, Bytes::from_static(b"draft"), &owner(), MAX, now())
            .unwrap();
        let b = uploads
            .upload_chunk(batch, 0, Bytes::from_static(b"final"), &owner(), MAX, now())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(uploads.chunk_count(), 1);

        let prepared = uploads
            .prepare_commit(batch, &[a], &owner(), None, now())
            .unwrap();
        assert_eq!(prepared.encoding.body(), Bytes::from_static(b"final"));
    }

    #[test]
    fn test_chunk_size_cap() {
        let mut uploads = UploadCoordinator::new();
        let batch = uploads.init(key(), EncodingType::Identity, None, now());
        let big = Bytes::from(vec![0u8; (MAX + 1) as usize]);
        assert!(matches!(
            uploads.upload_chunk(batch, 0, big, &owner(), MAX, now()),
            Err(StoreError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_only_owner_uploads() {
        let mut uploads = UploadCoordinator::new();
        let batch = uploads.init(key(), EncodingType::Identity, None, now());
        assert!(matches!(
            uploads.upload_chunk(batch, 0, Bytes::from_static(b"x"), &CallerId::new("other"), MAX, now()),
            Err(StoreError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_commit_validation() {
        let mut uploads = UploadCoordinator::new();
        let a = uploads.init(key(), EncodingType::Identity, None, now());
        let b = uploads.init(key(), EncodingType::Gzip, None, now());
        let ca = uploads
            .upload_chunk(a, 0, Bytes::from_static(b"a"), &owner(), MAX, now())
            .unwrap();
        let cb = uploads
            .upload_chunk(b, 0, Bytes::from_static(b"b"), &owner(), MAX, now())
            .unwrap();

        assert!(matches!(
            uploads.prepare_commit(a, &[], &owner(), None, now()),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            uploads.prepare_commit(a, &[ca, ca], &owner(), None, now()),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            uploads.prepare_commit(a, &[ca, cb], &owner(), None, now()),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            uploads.prepare_commit(a, &[ChunkId::new(99)], &owner(), None, now()),
            Err(StoreError::NoChunkFound(_))
        ));
        assert!(matches!(
            uploads.prepare_commit(BatchId::new(99), &[ca], &owner(), None, now()),
            Err(StoreError::NoBatchFound(_))
        ));
        assert!(matches!(
            uploads.prepare_commit(a, &[ca], &owner(), Some(0), now()),
            Err(StoreError::AssetTooLarge { size: 1, max: 0 })
        ));
    }

    #[test]
    fn test_finish_and_purges() {
        let mut uploads = UploadCoordinator::new();
        let proposal = ProposalId::new(7);
        let staged = uploads.init(key(), EncodingType::Identity, Some(proposal), now());
        let direct = uploads.init(key(), EncodingType::Identity, None, now());
        uploads
            .upload_chunk(staged, 0, Bytes::from_static(b"x"), &owner(), MAX, now())
            .unwrap();

        assert_eq!(uploads.purge_proposal(proposal), 1);
        assert_eq!(uploads.chunk_count(), 0);
        assert!(uploads.get(direct).is_ok());

        let later = now() + time::Duration::hours(2);
        assert_eq!(uploads.delete_stale(later - time::Duration::hours(1)), 1);
        assert_eq!(uploads.batch_count(), 0);
        assert!(uploads.finish(direct).is_none());
    }
}
