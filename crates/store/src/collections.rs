//! Collection rules registry.

use crate::error::{StoreError, StoreResult};
use larder_core::collection::validate_collection_name;
use larder_core::{DAPP_COLLECTION, Permission, RELEASES_COLLECTION, Rule, SetRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Named collections and their rules.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CollectionRegistry {
    rules: BTreeMap<String, Rule>,
}

impl CollectionRegistry {
    /// Registry holding the built-in collections, then `configured` rules on top.
    pub fn seeded(
        configured: &BTreeMap<String, SetRule>,
        now: OffsetDateTime,
    ) -> StoreResult<Self> {
        let mut registry = Self::default();
        for name in [DAPP_COLLECTION, RELEASES_COLLECTION] {
            if let Some(rule) = SetRule::builtin(name) {
                registry.insert(name, rule, now);
            }
        }
        for (name, rule) in configured {
            validate_collection_name(name)?;
            registry.insert(name, rule.clone(), now);
        }
        Ok(registry)
    }

    /// Restore from snapshotted rules.
    pub fn from_rules(rules: BTreeMap<String, Rule>) -> Self {
        Self { rules }
    }

    /// Look up the rule of a collection.
    pub fn get(&self, collection: &str) -> StoreResult<&Rule> {
        self.rules
            .get(collection)
            .ok_or_else(|| StoreError::NoCollectionFound(collection.to_string()))
    }

    /// Create or update a rule. `rule.version` must match the current version.
    pub fn set(&mut self, collection: &str, rule: SetRule, now: OffsetDateTime) -> StoreResult<Rule> {
        validate_collection_name(collection)?;

        let current = self.rules.get(collection).map(|r| r.version);
        if rule.version != current {
            return Err(StoreError::VersionMismatch {
                expected: rule.version,
                current,
            });
        }
        if is_builtin(collection) && rule.read != Permission::Public {
            return Err(StoreError::Validation(format!(
                "{collection} is served over HTTP and must stay publicly readable"
            )));
        }

        Ok(self.insert(collection, rule, now).clone())
    }

    /// Iterate over all rules.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Rule)> {
        self.rules.iter()
    }

    /// Names of the collections anyone may read.
    pub fn public_collections(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(_, rule)| rule.read == Permission::Public)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn rules(&self) -> &BTreeMap<String, Rule> {
        &self.rules
    }

    fn insert(&mut self, collection: &str, rule: SetRule, now: OffsetDateTime) -> &Rule {
        let (created_at, version) = match self.rules.get(collection) {
            Some(existing) => (existing.created_at, existing.version + 1),
            None => (now, 1),
        };
        self.rules.insert(
            collection.to_string(),
            Rule {
                read: rule.read,
                write: rule.write,
                max_size: rule.max_size,
                proposal_required: rule.proposal_required,
                created_at,
                updated_at: now,
                version,
            },
        );
        &self.rules[collection]
    }
}

fn is_builtin(collection: &str) -> bool {
    collection == DAPP_COLLECTION || collection == RELEASES_COLLECTION
}
