//! Collection rules.

use crate::access::Permission;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The collection web application assets are deployed to.
pub const DAPP_COLLECTION: &str = "#dapp";

/// The collection release artifacts are published to.
pub const RELEASES_COLLECTION: &str = "#releases";

/// Access policy and limits of one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub read: Permission,
    pub write: Permission,
    /// Upper bound on the length of any single encoding.
    pub max_size: Option<u64>,
    /// Writes must be staged through a proposal.
    pub proposal_required: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: u64,
}

/// Request to create or update a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRule {
    pub read: Permission,
    pub write: Permission,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub proposal_required: bool,
    /// Current version of the rule, `None` when creating it.
    #[serde(default)]
    pub version: Option<u64>,
}

impl SetRule {
    /// Defaults for the built-in collections.
    pub fn builtin(collection: &str) -> Option<Self> {
        match collection {
            DAPP_COLLECTION | RELEASES_COLLECTION => Some(Self {
                read: Permission::Public,
                write: Permission::Controllers,
                max_size: None,
                proposal_required: true,
                version: None,
            }),
            _ => None,
        }
    }
}

/// Check a collection name.
///
/// Built-in collections start with `#`; user collections are plain
/// identifiers.
pub fn validate_collection_name(name: &str) -> crate::Result<()> {
    let body = name.strip_prefix('#').unwrap_or(name);
    let valid = !body.is_empty()
        && body.len() <= 64
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(crate::Error::InvalidPath(format!(
            "invalid collection name: {name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_require_proposals() {
        let dapp = SetRule::builtin(DAPP_COLLECTION).unwrap();
        assert!(dapp.proposal_required);
        assert_eq!(dapp.read, Permission::Public);
        assert!(SetRule::builtin("images").is_none());
    }

    #[test]
    fn test_collection_names() {
        assert!(validate_collection_name("#dapp").is_ok());
        assert!(validate_collection_name("images_2024").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("#").is_err());
        assert!(validate_collection_name("a/b").is_err());
    }
}
