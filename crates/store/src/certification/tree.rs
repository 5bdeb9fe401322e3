//! Binary Merkle tree over certified responses.
//!
//! Uses domain-separated SHA-256:
//! - Leaf: `SHA256(0x00 || len(key) || key || len(encoding) || encoding || response_hash)`.
//! - Node: `SHA256(0x01 || left || right)`.
//!
//! A level with an odd number of nodes promotes its last node unchanged.

use base64::Engine;
use larder_core::{ContentHash, EncodingType};
use serde::{Deserialize, Serialize};

/// Compute a leaf hash for one certified `(key, encoding)` response.
pub fn leaf_hash(key: &str, encoding: EncodingType, response_hash: &ContentHash) -> ContentHash {
    let mut hasher = ContentHash::hasher();
    hasher.update(&[0x00]);
    hasher.update_field(key.as_bytes());
    hasher.update_field(encoding.as_str().as_bytes());
    hasher.update(response_hash.as_bytes());
    hasher.finalize()
}

/// Compute a parent node hash.
pub fn node_hash(left: &ContentHash, right: &ContentHash) -> ContentHash {
    let mut hasher = ContentHash::hasher();
    hasher.update(&[0x01]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize()
}

/// Root of a tree without leaves.
pub fn empty_root() -> ContentHash {
    ContentHash::compute(b"")
}

/// All levels of the tree, leaves first.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    levels: Vec<Vec<ContentHash>>,
}

impl MerkleTree {
    /// Build the tree from leaf hashes in their final order.
    pub fn build(leaves: Vec<ContentHash>) -> Self {
        if leaves.is_empty() {
            return Self::default();
        }

        let mut levels = vec![leaves];
        while let Some(level) = levels.last()
            && level.len() > 1
        {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// The aggregate witness.
    pub fn root(&self) -> ContentHash {
        self.levels
            .last()
            .and_then(|top| top.first().copied())
            .unwrap_or_else(empty_root)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return None;
        }

        let mut siblings = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if idx % 2 == 1 {
                siblings.push(level[idx - 1]);
            } else if let Some(right) = level.get(idx + 1) {
                siblings.push(*right);
            }
            idx /= 2;
        }

        Some(MerkleProof {
            index: index as u64,
            leaf_count: leaf_count as u64,
            siblings,
        })
    }
}

/// Proof that a leaf is part of a tree with a given root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    pub leaf_count: u64,
    pub siblings: Vec<ContentHash>,
}

impl MerkleProof {
    /// Fold the proof from `leaf` up to the root it implies.
    ///
    /// Returns `None` if the proof's shape does not fit its leaf count.
    pub fn root_for(&self, leaf: ContentHash) -> Option<ContentHash> {
        if self.index >= self.leaf_count {
            return None;
        }

        let mut hash = leaf;
        let mut idx = self.index;
        let mut count = self.leaf_count;
        let mut siblings = self.siblings.iter();
        while count > 1 {
            if idx % 2 == 1 {
                hash = node_hash(siblings.next()?, &hash);
            } else if idx + 1 < count {
                hash = node_hash(&hash, siblings.next()?);
            }
            idx /= 2;
            count = count.div_ceil(2);
        }

        siblings.next().is_none().then_some(hash)
    }

    /// Encode as base64 JSON for the certificate header.
    pub fn to_base64(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::STANDARD.encode(json)
    }

    pub fn from_base64(s: &str) -> Option<Self> {
        let json = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
        serde_json::from_slice(&json).ok()
    }
}
