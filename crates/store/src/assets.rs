//! Collection-scoped asset map, kept in lockstep with the certification index.
//!
//! Every mutation is first expressed as a [`Changeset`] that is validated in
//! full, then applied without further failure points, and finally the
//! certification index is refreshed for exactly the affected paths.

use crate::certification::CertificationIndex;
use crate::error::{StoreError, StoreResult};
use crate::proposals::StagedAsset;
use crate::reserved::{self, Channel};
use larder_core::{
    Asset, AssetEncoding, AssetKey, AssetView, Caller, EncodingType, HeaderField, ListOrderField,
    ListParams, ListResults, Rule,
};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

/// A single-encoding write.
#[derive(Clone, Debug)]
pub struct AssetWrite {
    pub key: AssetKey,
    pub headers: Vec<HeaderField>,
    pub encoding_type: EncodingType,
    pub encoding: AssetEncoding,
    /// Current version of the asset, `None` when creating it.
    pub expected_version: Option<u64>,
}

/// A validated set of upserts and removals.
#[derive(Debug, Default)]
struct Changeset {
    upserts: Vec<Asset>,
    removals: Vec<String>,
}

impl Changeset {
    fn affected(&self) -> Vec<String> {
        let mut paths: BTreeSet<String> = self.removals.iter().cloned().collect();
        paths.extend(self.upserts.iter().map(|a| a.key.full_path.clone()));
        paths.into_iter().collect()
    }
}

/// Live assets of every collection.
#[derive(Debug)]
pub struct AssetStore {
    assets: BTreeMap<String, Asset>,
    certification: CertificationIndex,
}

impl AssetStore {
    pub fn new(certification: CertificationIndex) -> Self {
        Self {
            assets: BTreeMap::new(),
            certification,
        }
    }

    /// Restore assets and certify all of them.
    pub fn restore(assets: Vec<Asset>, mut certification: CertificationIndex) -> Self {
        let assets: BTreeMap<String, Asset> = assets
            .into_iter()
            .map(|asset| (asset.key.full_path.clone(), asset))
            .collect();
        certification.refresh_all(&assets);
        Self {
            assets,
            certification,
        }
    }

    pub fn certification(&self) -> &CertificationIndex {
        &self.certification
    }

    /// Change which collections the read path serves.
    pub fn set_public_collections(&mut self, collections: Vec<String>) {
        self.certification
            .set_public_collections(collections, &self.assets);
    }

    /// Look up an asset of a collection.
    pub fn get(&self, collection: &str, full_path: &str) -> Option<&Asset> {
        self.assets
            .get(full_path)
            .filter(|asset| asset.key.collection == collection)
    }

    /// Look up an asset regardless of its collection.
    pub fn get_by_path(&self, full_path: &str) -> Option<&Asset> {
        self.assets.get(full_path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Iterate over every asset.
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Write one encoding of an asset.
    ///
    /// An identity encoding replaces all encodings of the asset; any other
    /// encoding is added or replaced alone.
    pub fn put(
        &mut self,
        write: AssetWrite,
        channel: Channel<'_>,
        now: OffsetDateTime,
    ) -> StoreResult<Asset> {
        let full_path = write.key.full_path.clone();
        reserved::check_write(&full_path, &write.key.collection, channel)?;

        let existing = self.owned_by_collection(&write.key.collection, &full_path)?;
        let current = existing.map(|asset| asset.version);
        if write.expected_version != current {
            return Err(StoreError::VersionMismatch {
                expected: write.expected_version,
                current,
            });
        }

        let mut encodings = match existing {
            Some(asset) if write.encoding_type != EncodingType::Identity => asset.encodings.clone(),
            _ => BTreeMap::new(),
        };
        encodings.insert(write.encoding_type, write.encoding);

        let asset = merged(existing, write.key, write.headers, encodings, now);
        self.apply(Changeset {
            upserts: vec![asset.clone()],
            removals: Vec::new(),
        });
        Ok(asset)
    }

    /// Delete one asset.
    pub fn delete(
        &mut self,
        collection: &str,
        full_path: &str,
        expected_version: Option<u64>,
        channel: Channel<'_>,
    ) -> StoreResult<Asset> {
        let asset = self
            .get(collection, full_path)
            .ok_or_else(|| not_found(collection, full_path))?;
        reserved::check_delete(full_path, channel)?;
        if let Some(expected) = expected_version
            && expected != asset.version
        {
            return Err(StoreError::VersionMismatch {
                expected: Some(expected),
                current: Some(asset.version),
            });
        }

        let removed = asset.clone();
        self.apply(Changeset {
            upserts: Vec::new(),
            removals: vec![full_path.to_string()],
        });
        Ok(removed)
    }

    /// Delete the non-reserved assets matching a listing filter.
    pub fn delete_filtered(
        &mut self,
        collection: &str,
        params: &ListParams,
        rule: &Rule,
        caller: &Caller,
    ) -> usize {
        let removals: Vec<String> = self
            .matching(collection, params, |asset| {
                rule.write.allows(caller, Some(&asset.key.owner))
            })
            .into_iter()
            .filter(|asset| !reserved::is_reserved(&asset.key.full_path))
            .map(|asset| asset.key.full_path.clone())
            .collect();
        let count = removals.len();
        self.apply(Changeset {
            upserts: Vec::new(),
            removals,
        });
        count
    }

    /// Delete several assets at once. Nothing is removed if any path fails.
    pub fn delete_many(
        &mut self,
        collection: &str,
        full_paths: &[String],
        rule: &Rule,
        caller: &Caller,
    ) -> StoreResult<usize> {
        let mut removals = BTreeSet::new();
        for full_path in full_paths {
            let asset = self
                .get(collection, full_path)
                .ok_or_else(|| not_found(collection, full_path))?;
            reserved::check_delete(full_path, Channel::Direct { caller })?;
            if !rule.write.allows(caller, Some(&asset.key.owner)) {
                return Err(StoreError::PermissionDenied(format!(
                    "cannot delete {full_path} in {collection}"
                )));
            }
            removals.insert(full_path.clone());
        }

        let count = removals.len();
        self.apply(Changeset {
            upserts: Vec::new(),
            removals: removals.into_iter().collect(),
        });
        Ok(count)
    }

    /// Merge staged proposal assets into `collection`, optionally clearing it first.
    ///
    /// Staged assets replace the encoding set of their target. Validation
    /// happens before anything changes.
    pub fn apply_staged(
        &mut self,
        collection: &str,
        clear_existing: bool,
        staged: Vec<StagedAsset>,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<String>> {
        let mut staged_paths = BTreeSet::new();
        for item in &staged {
            if item.key.collection != collection {
                return Err(StoreError::Validation(format!(
                    "{} is staged for {} but the proposal targets {collection}",
                    item.key.full_path, item.key.collection
                )));
            }
            self.owned_by_collection(collection, &item.key.full_path)?;
            staged_paths.insert(item.key.full_path.clone());
        }

        let removals: Vec<String> = if clear_existing {
            self.in_collection(collection)
                .map(|asset| asset.key.full_path.clone())
                .filter(|path| !staged_paths.contains(path) && !reserved::is_reserved(path))
                .collect()
        } else {
            Vec::new()
        };

        let upserts: Vec<Asset> = staged
            .into_iter()
            .map(|item| {
                let existing = self.assets.get(&item.key.full_path);
                merged(existing, item.key, item.headers, item.encodings, now)
            })
            .collect();

        let changes = Changeset { upserts, removals };
        let affected = changes.affected();
        self.apply(changes);
        Ok(affected)
    }

    /// Write an asset on behalf of the custom domain registry.
    pub(crate) fn put_registry_file(
        &mut self,
        key: AssetKey,
        headers: Vec<HeaderField>,
        encoding: AssetEncoding,
        now: OffsetDateTime,
    ) -> StoreResult<Asset> {
        let expected_version = self.get_by_path(&key.full_path).map(|a| a.version);
        self.put(
            AssetWrite {
                key,
                headers,
                encoding_type: EncodingType::Identity,
                encoding,
                expected_version,
            },
            Channel::Registry,
            now,
        )
    }

    /// One page of a collection's assets visible to `caller`.
    pub fn list(
        &self,
        collection: &str,
        params: &ListParams,
        rule: &Rule,
        caller: &Caller,
    ) -> ListResults<AssetView> {
        let matches = self.matching(collection, params, |asset| {
            rule.read.allows(caller, Some(&asset.key.owner))
        });
        let page = ListResults::paginate(matches, &params.paginate, &params.order, |asset| {
            asset.key.full_path.clone()
        });
        ListResults {
            items: page.items.iter().map(|asset| asset.view()).collect(),
            items_length: page.items_length,
            items_page: page.items_page,
            matches_length: page.matches_length,
            matches_pages: page.matches_pages,
        }
    }

    /// Number of assets a listing would match.
    pub fn count(&self, collection: &str, params: &ListParams, rule: &Rule, caller: &Caller) -> usize {
        self.matching(collection, params, |asset| {
            rule.read.allows(caller, Some(&asset.key.owner))
        })
        .len()
    }

    fn in_collection<'a, 'c>(
        &'a self,
        collection: &'c str,
    ) -> impl Iterator<Item = &'a Asset> + use<'a, 'c> {
        self.assets
            .values()
            .filter(move |asset| asset.key.collection == collection)
    }

    /// Filtered and ordered assets of a collection.
    fn matching<F>(&self, collection: &str, params: &ListParams, visible: F) -> Vec<&Asset>
    where
        F: Fn(&Asset) -> bool,
    {
        let mut matches: Vec<&Asset> = self
            .in_collection(collection)
            .filter(|asset| {
                params
                    .matcher
                    .matches(&asset.key.full_path, asset.key.description.as_deref())
            })
            .filter(|asset| {
                params
                    .owner
                    .as_ref()
                    .is_none_or(|owner| *owner == asset.key.owner)
            })
            .filter(|asset| visible(asset))
            .collect();

        match params.order.field {
            ListOrderField::Keys => {}
            ListOrderField::CreatedAt => matches.sort_by_key(|asset| asset.created_at),
            ListOrderField::UpdatedAt => matches.sort_by_key(|asset| asset.updated_at),
        }
        if params.order.desc {
            matches.reverse();
        }
        matches
    }

    /// The existing asset at `full_path`, failing if another collection owns the path.
    fn owned_by_collection(&self, collection: &str, full_path: &str) -> StoreResult<Option<&Asset>> {
        match self.assets.get(full_path) {
            Some(asset) if asset.key.collection != collection => Err(StoreError::Validation(format!(
                "{full_path} already belongs to collection {}",
                asset.key.collection
            ))),
            other => Ok(other),
        }
    }

    fn apply(&mut self, changes: Changeset) {
        if changes.upserts.is_empty() && changes.removals.is_empty() {
            return;
        }
        let affected = changes.affected();
        for path in &changes.removals {
            self.assets.remove(path);
        }
        for asset in changes.upserts {
            self.assets.insert(asset.key.full_path.clone(), asset);
        }
        self.certification
            .refresh(&self.assets, affected.iter().map(String::as_str));
    }
}

/// Build the next state of an asset, keeping its owner and creation time.
fn merged(
    existing: Option<&Asset>,
    mut key: AssetKey,
    headers: Vec<HeaderField>,
    encodings: BTreeMap<EncodingType, AssetEncoding>,
    now: OffsetDateTime,
) -> Asset {
    if let Some(existing) = existing {
        key.owner = existing.key.owner.clone();
    }
    Asset {
        key,
        headers,
        encodings,
        created_at: existing.map_or(now, |asset| asset.created_at),
        updated_at: now,
        version: existing.map_or(1, |asset| asset.version + 1),
    }
}

fn not_found(collection: &str, full_path: &str) -> StoreError {
    StoreError::NoAssetFound {
        collection: collection.to_string(),
        full_path: full_path.to_string(),
    }
}
