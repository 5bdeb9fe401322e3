//! Custom domain registry.
//!
//! The registered domains are published as `/.well-known/ic-domains` in
//! `#dapp`, one domain per line. The file is rewritten on every change and
//! removed only when the last domain is deleted.

use crate::assets::AssetStore;
use crate::error::{StoreError, StoreResult};
use crate::reserved::Channel;
use bytes::Bytes;
use larder_core::path::DOMAINS_PATH;
use larder_core::{AssetEncoding, AssetKey, CallerId, DAPP_COLLECTION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

const MAX_DOMAIN_LEN: usize = 253;

/// A registered custom domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomain {
    /// Identifier assigned by the boundary node registration, if any.
    #[serde(default)]
    pub bn_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustomDomains {
    domains: BTreeMap<String, CustomDomain>,
}

impl CustomDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains(domains: BTreeMap<String, CustomDomain>) -> Self {
        Self { domains }
    }

    /// Register or update a domain and republish the domains file.
    pub fn set(
        &mut self,
        domain: &str,
        bn_id: Option<String>,
        assets: &mut AssetStore,
        now: OffsetDateTime,
    ) -> StoreResult<CustomDomain> {
        let domain = normalize(domain)?;

        let entry = match self.domains.get(&domain) {
            Some(existing) => CustomDomain {
                bn_id,
                created_at: existing.created_at,
                updated_at: now,
                version: existing.version + 1,
            },
            None => CustomDomain {
                bn_id,
                created_at: now,
                updated_at: now,
                version: 1,
            },
        };

        let mut next = self.domains.clone();
        next.insert(domain.clone(), entry.clone());
        publish(&next, assets, now)?;
        self.domains = next;

        tracing::info!(domain = %domain, "Custom domain set");
        Ok(entry)
    }

    /// Remove a domain. The domains file goes away with the last one.
    pub fn delete(
        &mut self,
        domain: &str,
        assets: &mut AssetStore,
        now: OffsetDateTime,
    ) -> StoreResult<CustomDomain> {
        let domain = normalize(domain)?;
        let mut next = self.domains.clone();
        let removed = next
            .remove(&domain)
            .ok_or_else(|| StoreError::NoDomainFound(domain.clone()))?;
        publish(&next, assets, now)?;
        self.domains = next;

        tracing::info!(domain = %domain, "Custom domain deleted");
        Ok(removed)
    }

    pub fn list(&self) -> &BTreeMap<String, CustomDomain> {
        &self.domains
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Body of the domains file.
pub fn domains_file(domains: &BTreeMap<String, CustomDomain>) -> String {
    domains.keys().cloned().collect::<Vec<_>>().join("\n")
}

fn publish(
    domains: &BTreeMap<String, CustomDomain>,
    assets: &mut AssetStore,
    now: OffsetDateTime,
) -> StoreResult<()> {
    if domains.is_empty() {
        if assets.get(DAPP_COLLECTION, DOMAINS_PATH).is_some() {
            assets.delete(DAPP_COLLECTION, DOMAINS_PATH, None, Channel::Registry)?;
        }
        return Ok(());
    }

    let key = AssetKey {
        full_path: DOMAINS_PATH.to_string(),
        collection: DAPP_COLLECTION.to_string(),
        owner: CallerId::anonymous(),
        token: None,
        name: "ic-domains".to_string(),
        description: None,
    };
    let body = Bytes::from(domains_file(domains));
    let encoding = AssetEncoding::from_chunks(vec![body], now);
    let headers = vec![("content-type".to_string(), "text/plain".to_string())];
    assets.put_registry_file(key, headers, encoding, now)?;
    Ok(())
}

/// Lower-case and check a DNS name.
fn normalize(domain: &str) -> StoreResult<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let invalid = |reason: &str| StoreError::Validation(format!("invalid domain {domain:?}: {reason}"));

    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(invalid("length must be 1 to 253 characters"));
    }
    if !domain.contains('.') {
        return Err(invalid("must contain at least two labels"));
    }
    for label in domain.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-');
        if !valid {
            return Err(invalid("labels are 1 to 63 letters, digits or inner hyphens"));
        }
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certification::CertificationIndex;
    use larder_core::config::HttpConfig;

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    fn assets() -> AssetStore {
        AssetStore::new(CertificationIndex::new(
            HttpConfig::default(),
            [DAPP_COLLECTION.to_string()],
        ))
    }

    fn file_body(assets: &AssetStore) -> Option<String> {
        assets
            .get(DAPP_COLLECTION, DOMAINS_PATH)
            .map(|asset| String::from_utf8_lossy(&asset.encodings.values().next().unwrap().body()).into_owned())
    }

    #[test]
    fn test_domains_file_follows_registry() {
        let mut domains = CustomDomains::new();
        let mut assets = assets();

        domains.set("Hello.Example.com", None, &mut assets, now()).unwrap();
        domains.set("a.example.org", Some("bn-1".into()), &mut assets, now()).unwrap();
        assert_eq!(
            file_body(&assets).as_deref(),
            Some("a.example.org\nhello.example.com")
        );
        assert!(assets.certification().is_certified(DOMAINS_PATH));

        domains.delete("a.example.org", &mut assets, now()).unwrap();
        assert_eq!(file_body(&assets).as_deref(), Some("hello.example.com"));

        domains.delete("hello.example.com", &mut assets, now()).unwrap();
        assert!(file_body(&assets).is_none());
        assert!(domains.is_empty());
    }

    #[test]
    fn test_update_bumps_version() {
        let mut domains = CustomDomains::new();
        let mut assets = assets();
        domains.set("example.com", None, &mut assets, now()).unwrap();
        let updated = domains
            .set("example.com", Some("bn".into()), &mut assets, now())
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.bn_id.as_deref(), Some("bn"));
        assert_eq!(assets.get(DAPP_COLLECTION, DOMAINS_PATH).unwrap().version, 2);
    }

    #[test]
    fn test_rejects_invalid_domains() {
        let mut domains = CustomDomains::new();
        let mut assets = assets();
        for bad in ["", "localhost", "-bad.example.com", "a..b", "under_score.com"] {
            assert!(
                matches!(
                    domains.set(bad, None, &mut assets, now()),
                    Err(StoreError::Validation(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(assets.is_empty());
    }

    #[test]
    fn test_delete_unknown_domain() {
        let mut domains = CustomDomains::new();
        let mut assets = assets();
        assert!(matches!(
            domains.delete("nope.example.com", &mut assets, now()),
            Err(StoreError::NoDomainFound(_))
        ));
    }
}
