//! Callers, scopes and collection permissions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of whoever issued a call.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    const ANONYMOUS: &'static str = "anonymous";

    /// Create a caller ID from a configured name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The shared identity of unauthenticated callers.
    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    /// Check if this is the anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        self.0 == Self::ANONYMOUS
    }

    /// Get the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallerId({})", self.0)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scopes granted to a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Read non-public collections.
    Read,
    /// Deploy assets and drive proposals.
    Write,
    /// Manage collection rules and custom domains.
    Admin,
}

impl Scope {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err(crate::Error::InvalidScope(format!("unknown scope: {s}"))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    /// Check if this scope implies another scope.
    pub fn implies(&self, other: &Self) -> bool {
        match self {
            Self::Admin => true,
            Self::Write => matches!(other, Self::Write | Self::Read),
            Self::Read => matches!(other, Self::Read),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved caller: an identity plus the scope it was granted, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: CallerId,
    pub scope: Option<Scope>,
}

impl Caller {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self {
            id: CallerId::anonymous(),
            scope: None,
        }
    }

    /// A configured controller.
    pub fn controller(id: impl Into<String>, scope: Scope) -> Self {
        Self {
            id: CallerId::new(id),
            scope: Some(scope),
        }
    }

    /// Check if the caller has a specific scope.
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scope.is_some_and(|s| s.implies(&scope))
    }

    /// Controllers may deploy: they hold at least the write scope.
    pub fn is_controller(&self) -> bool {
        self.has_scope(Scope::Write)
    }

    pub fn is_admin(&self) -> bool {
        self.has_scope(Scope::Admin)
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_anonymous()
    }
}

/// Who may read or write the assets of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Anyone, including anonymous callers.
    Public,
    /// Only the asset owner.
    Private,
    /// The asset owner or any controller.
    Managed,
    /// Controllers only.
    Controllers,
}

impl Permission {
    /// Check the permission for a caller against an asset's owner.
    ///
    /// `owner` is `None` when the asset does not exist yet; in that case the
    /// caller would become the owner.
    pub fn allows(&self, caller: &Caller, owner: Option<&CallerId>) -> bool {
        let owns = match owner {
            Some(owner) => !caller.is_anonymous() && owner == &caller.id,
            None => !caller.is_anonymous(),
        };
        match self {
            Self::Public => true,
            Self::Private => owns,
            Self::Managed => owns || caller.is_controller(),
            Self::Controllers => caller.is_controller(),
        }
    }
}
