//! Write policy for reserved paths.
//!
//! Pure checks, run before any state changes.

use crate::error::{StoreError, StoreResult};
use larder_core::path::{self, ALTERNATIVE_ORIGINS_PATH, DOMAINS_PATH, RELEASE_SUFFIX, RELEASES_PREFIX};
use larder_core::{Caller, DAPP_COLLECTION, PathClass, ProposalType, RELEASES_COLLECTION};

/// How a write reaches the asset store.
#[derive(Clone, Copy, Debug)]
pub enum Channel<'a> {
    /// A direct upload commit.
    Direct { caller: &'a Caller },
    /// An upload staged under a proposal.
    Proposal {
        caller: &'a Caller,
        proposal_type: &'a ProposalType,
    },
    /// The custom domain registry.
    Registry,
}

impl Channel<'_> {
    fn is_admin(&self) -> bool {
        match self {
            Self::Direct { caller } | Self::Proposal { caller, .. } => caller.is_admin(),
            Self::Registry => false,
        }
    }
}

/// Check that `full_path` may be written in `collection` through `channel`.
pub fn check_write(full_path: &str, collection: &str, channel: Channel<'_>) -> StoreResult<PathClass> {
    let class = path::classify(full_path)?;

    if collection == RELEASES_COLLECTION && !matches!(class, PathClass::Release(_)) {
        return Err(StoreError::PatternMismatch(format!(
            "{full_path} does not match {RELEASES_PREFIX}<segment>-v<major>.<minor>.<patch>{RELEASE_SUFFIX}"
        )));
    }

    match (&class, channel) {
        (PathClass::Regular, _) => {}
        (PathClass::Domains, Channel::Registry) => {}
        (PathClass::Domains, _) => {
            return Err(StoreError::ReservedAsset(format!(
                "{DOMAINS_PATH} is maintained by the custom domain registry"
            )));
        }
        (PathClass::AlternativeOrigins, channel) => {
            if collection != DAPP_COLLECTION || !channel.is_admin() {
                return Err(StoreError::ReservedAsset(format!(
                    "{ALTERNATIVE_ORIGINS_PATH} can only be written to {DAPP_COLLECTION} by an admin"
                )));
            }
        }
        (
            PathClass::Release(artifact),
            Channel::Proposal {
                proposal_type: ProposalType::SegmentsDeployment { segments },
                ..
            },
        ) => {
            if segments.get(&artifact.segment) != Some(&artifact.version) {
                return Err(StoreError::ReservedAsset(format!(
                    "{full_path} is not part of this deployment"
                )));
            }
        }
        (PathClass::Release(_), _) => {
            return Err(StoreError::ReservedAsset(format!(
                "{full_path} can only be published through a segments deployment"
            )));
        }
    }

    Ok(class)
}

/// Check that a reserved asset may be deleted through `channel`.
pub fn check_delete(full_path: &str, channel: Channel<'_>) -> StoreResult<()> {
    match path::classify(full_path) {
        Ok(PathClass::Domains) if !matches!(channel, Channel::Registry) => {
            Err(StoreError::ReservedAsset(format!(
                "{DOMAINS_PATH} is removed with the last custom domain"
            )))
        }
        _ => Ok(()),
    }
}

/// Check the content of reserved files that have a fixed format.
pub fn check_content(class: &PathClass, body: &[u8]) -> StoreResult<()> {
    if matches!(class, PathClass::AlternativeOrigins) {
        serde_json::from_slice::<serde_json::Value>(body).map_err(|e| {
            StoreError::Validation(format!("{ALTERNATIVE_ORIGINS_PATH} must be JSON: {e}"))
        })?;
    }
    Ok(())
}

/// Reserved paths survive bulk clears.
pub fn is_reserved(full_path: &str) -> bool {
    path::classify(full_path).is_ok_and(|class| class.is_reserved())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{Scope, Segment};
    use std::collections::BTreeMap;

    fn deployment(version: &str) -> ProposalType {
        let mut segments = BTreeMap::new();
        segments.insert(Segment::Satellite, version.to_string());
        ProposalType::SegmentsDeployment { segments }
    }

    #[test]
    fn test_regular_paths_pass() {
        let caller = Caller::controller("ci", Scope::Write);
        let class = check_write("/index.html", DAPP_COLLECTION, Channel::Direct { caller: &caller }).unwrap();
        assert_eq!(class, PathClass::Regular);
    }

    #[test]
    fn test_domains_file_only_through_registry() {
        let admin = Caller::controller("admin", Scope::Admin);
        assert!(matches!(
            check_write(DOMAINS_PATH, DAPP_COLLECTION, Channel::Direct { caller: &admin }),
            Err(StoreError::ReservedAsset(_))
        ));
        assert!(check_write(DOMAINS_PATH, DAPP_COLLECTION, Channel::Registry).is_ok());
        assert!(check_delete(DOMAINS_PATH, Channel::Direct { caller: &admin }).is_err());
        assert!(check_delete(DOMAINS_PATH, Channel::Registry).is_ok());
    }

    #[test]
    fn test_alternative_origins_need_admin() {
        let writer = Caller::controller("ci", Scope::Write);
        let admin = Caller::controller("admin", Scope::Admin);
        assert!(check_write(ALTERNATIVE_ORIGINS_PATH, DAPP_COLLECTION, Channel::Direct { caller: &writer }).is_err());
        assert!(check_write(ALTERNATIVE_ORIGINS_PATH, DAPP_COLLECTION, Channel::Direct { caller: &admin }).is_ok());
        assert!(check_write(ALTERNATIVE_ORIGINS_PATH, "images", Channel::Direct { caller: &admin }).is_err());
    }

    #[test]
    fn test_release_paths() {
        let caller = Caller::controller("ci", Scope::Write);
        let path = "/releases/satellite-v0.1.2.wasm.gz";
        let proposal_type = deployment("0.1.2");

        assert!(matches!(
            check_write(path, RELEASES_COLLECTION, Channel::Direct { caller: &caller }),
            Err(StoreError::ReservedAsset(_))
        ));
        assert!(
            check_write(
                path,
                RELEASES_COLLECTION,
                Channel::Proposal {
                    caller: &caller,
                    proposal_type: &proposal_type
                }
            )
            .is_ok()
        );

        let other = deployment("0.2.0");
        assert!(
            check_write(
                path,
                RELEASES_COLLECTION,
                Channel::Proposal {
                    caller: &caller,
                    proposal_type: &other
                }
            )
            .is_err()
        );
    }

    #[test]
    fn test_releases_collection_enforces_pattern() {
        let caller = Caller::controller("ci", Scope::Write);
        let proposal_type = deployment("0.1.2");
        let channel = Channel::Proposal {
            caller: &caller,
            proposal_type: &proposal_type,
        };
        assert!(matches!(
            check_write("/index.html", RELEASES_COLLECTION, channel),
            Err(StoreError::PatternMismatch(_))
        ));
        assert!(matches!(
            check_write("/releases/satellite-v1.wasm.gz", RELEASES_COLLECTION, channel),
            Err(StoreError::PatternMismatch(_))
        ));
    }

    #[test]
    fn test_alternative_origins_content() {
        let class = PathClass::AlternativeOrigins;
        assert!(check_content(&class, br#"{"alternativeOrigins": []}"#).is_ok());
        assert!(check_content(&class, b"not json").is_err());
        assert!(check_content(&PathClass::Regular, b"not json").is_ok());
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved(DOMAINS_PATH));
        assert!(is_reserved("/releases/orbiter-v1.0.0.wasm.gz"));
        assert!(!is_reserved("/index.html"));
    }
}
