//! Asset path validation and reserved path classification.
//!
//! These are pure checks: they never look at store state. The store decides
//! whether a classified path may be written in a given context.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The custom domain aggregation file, regenerated from the registered domains.
pub const DOMAINS_PATH: &str = "/.well-known/ic-domains";

/// The alternative origins file, writable by admins only.
pub const ALTERNATIVE_ORIGINS_PATH: &str = "/.well-known/ii-alternative-origins";

/// Namespace holding release artifacts.
pub const RELEASES_PREFIX: &str = "/releases/";

/// Suffix every release artifact carries.
pub const RELEASE_SUFFIX: &str = ".wasm.gz";

/// Maximum accepted path length in bytes.
pub const MAX_PATH_LEN: usize = 1024;

/// Components that can be published as release artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Satellite,
    MissionControl,
    Orbiter,
}

impl Segment {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "satellite" => Some(Self::Satellite),
            "mission_control" => Some(Self::MissionControl),
            "orbiter" => Some(Self::Orbiter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Satellite => "satellite",
            Self::MissionControl => "mission_control",
            Self::Orbiter => "orbiter",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed `/releases/<segment>-v<major>.<minor>.<patch>.wasm.gz` path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArtifact {
    pub segment: Segment,
    pub version: String,
}

/// What kind of path an asset lives at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathClass {
    /// Any path without special handling.
    Regular,
    /// [`DOMAINS_PATH`].
    Domains,
    /// [`ALTERNATIVE_ORIGINS_PATH`].
    AlternativeOrigins,
    /// A well-formed release artifact.
    Release(ReleaseArtifact),
}

impl PathClass {
    /// Reserved paths survive bulk clears and need a sanctioned writer.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, Self::Regular)
    }
}

/// Validate a path and classify it.
///
/// Fails with [`crate::Error::InvalidPath`] for malformed paths and
/// [`crate::Error::PatternMismatch`] for paths inside the release namespace
/// that do not follow the release naming pattern.
pub fn classify(full_path: &str) -> crate::Result<PathClass> {
    validate(full_path)?;

    if full_path == DOMAINS_PATH {
        return Ok(PathClass::Domains);
    }
    if full_path == ALTERNATIVE_ORIGINS_PATH {
        return Ok(PathClass::AlternativeOrigins);
    }
    if full_path.starts_with(RELEASES_PREFIX) || full_path == "/releases" {
        return parse_release(full_path).map(PathClass::Release);
    }
    Ok(PathClass::Regular)
}

/// Check the general shape of a path.
pub fn validate(full_path: &str) -> crate::Result<()> {
    let invalid = |reason: &str| crate::Error::InvalidPath(format!("{full_path:?}: {reason}"));

    if !full_path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if full_path.len() > MAX_PATH_LEN {
        return Err(invalid("too long"));
    }
    if full_path.chars().any(|c| c.is_control() || c == '\\') {
        return Err(invalid("contains control characters or backslashes"));
    }
    if full_path.contains("//") {
        return Err(invalid("contains an empty segment"));
    }
    if full_path
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(invalid("contains relative segments"));
    }
    if full_path.contains('?') || full_path.contains('#') {
        return Err(invalid("contains a query or fragment"));
    }
    Ok(())
}

fn parse_release(full_path: &str) -> crate::Result<ReleaseArtifact> {
    let mismatch = || {
        crate::Error::PatternMismatch(format!(
            "{full_path} does not match {RELEASES_PREFIX}<segment>-v<major>.<minor>.<patch>{RELEASE_SUFFIX}"
        ))
    };

    let file = full_path
        .strip_prefix(RELEASES_PREFIX)
        .and_then(|rest| rest.strip_suffix(RELEASE_SUFFIX))
        .ok_or_else(mismatch)?;
    let (segment, version) = file.rsplit_once("-v").ok_or_else(mismatch)?;
    let segment = Segment::parse(segment).ok_or_else(mismatch)?;

    if !is_release_version(version) {
        return Err(mismatch());
    }

    Ok(ReleaseArtifact {
        segment,
        version: version.to_string(),
    })
}

/// Check a bare `major.minor.patch` version such as `0.1.2`.
pub fn is_release_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 9 && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_regular_paths() {
        assert_eq!(classify("/index.html").unwrap(), PathClass::Regular);
        assert_eq!(classify("/").unwrap(), PathClass::Regular);
        assert_eq!(classify("/a/b/c.js").unwrap(), PathClass::Regular);
    }

    #[test]
    fn test_malformed_paths() {
        for path in ["index.html", "/a//b", "/a/../b", "/./a", "/a\\b", "/a\nb", "/a?x=1"] {
            assert!(
                matches!(classify(path), Err(Error::InvalidPath(_))),
                "{path} should be invalid"
            );
        }
        let long = format!("/{}", "a".repeat(MAX_PATH_LEN));
        assert!(matches!(classify(&long), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_reserved_files() {
        assert_eq!(classify(DOMAINS_PATH).unwrap(), PathClass::Domains);
        assert_eq!(
            classify(ALTERNATIVE_ORIGINS_PATH).unwrap(),
            PathClass::AlternativeOrigins
        );
        assert!(classify(DOMAINS_PATH).unwrap().is_reserved());
        assert!(!classify("/.well-known/other").unwrap().is_reserved());
    }

    #[test]
    fn test_release_pattern() {
        let class = classify("/releases/mission_control-v0.12.3.wasm.gz").unwrap();
        assert_eq!(
            class,
            PathClass::Release(ReleaseArtifact {
                segment: Segment::MissionControl,
                version: "0.12.3".to_string(),
            })
        );

        for path in [
            "/releases/satellite.wasm.gz",
            "/releases/satellite-v1.2.wasm.gz",
            "/releases/satellite-v1.2.x.wasm.gz",
            "/releases/console-v1.2.3.wasm.gz",
            "/releases/satellite-v1.2.3.wasm",
            "/releases/notes.txt",
            "/releases",
        ] {
            assert!(
                matches!(classify(path), Err(Error::PatternMismatch(_))),
                "{path} should not match"
            );
        }
    }

    #[test]
    fn test_release_version() {
        assert!(is_release_version("1.0.0"));
        assert!(!is_release_version("1.0"));
        assert!(!is_release_version("v1.0.0"));
    }
}
