//! Proposals: staged, hash-verified bundles of asset changes.

use crate::access::CallerId;
use crate::collection::{DAPP_COLLECTION, RELEASES_COLLECTION};
use crate::encoding::EncodingType;
use crate::hash::ContentHash;
use crate::path::{Segment, is_release_version};
use crate::upload::counter_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

counter_id!(
    /// Identifier of a proposal. Assigned monotonically per store.
    ProposalId
);

/// What a proposal deploys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalType {
    /// Replace web application assets.
    AssetsUpgrade {
        /// Remove every non-reserved asset of the collection before merging.
        #[serde(default)]
        clear_existing_assets: Option<bool>,
    },
    /// Publish release artifacts for the named segments.
    SegmentsDeployment {
        /// Segment to the version being published.
        segments: BTreeMap<Segment, String>,
    },
}

impl ProposalType {
    /// The collection the proposal stages into.
    pub fn target_collection(&self) -> &'static str {
        match self {
            Self::AssetsUpgrade { .. } => DAPP_COLLECTION,
            Self::SegmentsDeployment { .. } => RELEASES_COLLECTION,
        }
    }

    /// Whether committing clears the target collection first.
    pub fn clears_existing(&self) -> bool {
        matches!(
            self,
            Self::AssetsUpgrade {
                clear_existing_assets: Some(true)
            }
        )
    }

    /// Check the type-specific payload.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::AssetsUpgrade { .. } => Ok(()),
            Self::SegmentsDeployment { segments } => {
                if segments.is_empty() {
                    return Err(crate::Error::InvalidProposal(
                        "a segments deployment must name at least one segment".to_string(),
                    ));
                }
                if let Some((segment, version)) =
                    segments.iter().find(|(_, v)| !is_release_version(v))
                {
                    return Err(crate::Error::InvalidProposal(format!(
                        "invalid version {version:?} for segment {segment}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Proposal lifecycle.
///
/// `Initialized -> Open -> {Executed, Failed}` and `Open -> Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Initialized,
    Open,
    Executed,
    Failed,
    Rejected,
}

impl ProposalStatus {
    /// Check if the proposal still accepts staged uploads.
    pub fn accepts_uploads(&self) -> bool {
        matches!(self, Self::Initialized | Self::Open)
    }

    /// Check if the proposal reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Rejected)
    }

    /// Check if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::Open)
                | (Self::Open, Self::Executed)
                | (Self::Open, Self::Failed)
                | (Self::Open, Self::Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Open => "open",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "open" => Ok(Self::Open),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(crate::Error::InvalidProposal(format!(
                "unknown proposal status: {s}"
            ))),
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposal and its lifecycle metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposal_type: ProposalType,
    pub status: ProposalStatus,
    /// Frozen at submission; commit and reject must present the same value.
    pub sha256: Option<ContentHash>,
    pub owner: CallerId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub executed_at: Option<OffsetDateTime>,
    pub version: u64,
}

impl Proposal {
    /// Create a proposal in the `Initialized` state.
    pub fn new(
        id: ProposalId,
        proposal_type: ProposalType,
        owner: CallerId,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            proposal_type,
            status: ProposalStatus::Initialized,
            sha256: None,
            owner,
            created_at: now,
            updated_at: now,
            executed_at: None,
            version: 1,
        }
    }

    /// Move to `next`, bumping the version.
    pub fn transition(&mut self, next: ProposalStatus, now: OffsetDateTime) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        self.version += 1;
        if next == ProposalStatus::Executed {
            self.executed_at = Some(now);
        }
        Ok(())
    }
}

/// One `(full_path, encoding, sha256)` triple staged under a proposal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StagedEntry<'a> {
    pub full_path: &'a str,
    pub encoding: EncodingType,
    pub sha256: ContentHash,
}

/// Compute the canonical hash of a proposal's staged content.
///
/// Entries are sorted before hashing, so the result does not depend on the
/// order uploads were committed in.
pub fn proposal_hash<'a>(
    entries: impl IntoIterator<Item = StagedEntry<'a>>,
    clear_existing_assets: bool,
) -> ContentHash {
    let mut entries: Vec<StagedEntry<'a>> = entries.into_iter().collect();
    entries.sort();

    let mut hasher = ContentHash::hasher();
    hasher.update_field(b"larder-proposal-v1");
    hasher.update(&(entries.len() as u64).to_be_bytes());
    for entry in &entries {
        hasher.update_field(entry.full_path.as_bytes());
        hasher.update_field(entry.encoding.as_str().as_bytes());
        hasher.update(entry.sha256.as_bytes());
    }
    hasher.update(&[u8::from(clear_existing_assets)]);
    hasher.finalize()
}
