//! Certification index: request keys to certified responses.
//!
//! Every servable `(key, encoding)` pair becomes a leaf of a Merkle tree.
//! Keys are request paths: asset paths, their aliases (directory index and
//! `.html`-less forms), configured redirects and rewrites, plus a fallback
//! not-found key. The tree root is what the instance signs.

mod response;
mod tree;

pub use response::{
    CertifiedResponse, NOT_FOUND_BODY, canonical_headers, certified_headers, content_type_for,
    response_hash,
};
pub use tree::{MerkleProof, MerkleTree, empty_root, leaf_hash, node_hash};

use crate::glob;
use larder_core::config::HttpConfig;
use larder_core::{Asset, ContentHash, EncodingType};
use std::collections::{BTreeMap, BTreeSet};

/// Key of the fallback response for unmapped paths.
pub const NOT_FOUND_KEY: &str = "<not-found>";

/// Page served, with status 404, for unmapped paths when present.
pub const NOT_FOUND_PAGE: &str = "/404.html";

static FALLBACK_ROUTE: Route = Route::NotFound { page: None };

/// What a request key resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Serve an asset with status 200.
    Asset { full_path: String },
    Redirect { location: String, status_code: u16 },
    /// Serve the 404 page if `page` is set, else the built-in body.
    NotFound { page: Option<String> },
}

/// Certified responses of one asset, keyed by encoding.
#[derive(Clone, Debug)]
struct CachedAsset {
    responses: BTreeMap<EncodingType, CertifiedResponse>,
}

/// Mapping from request keys to certified responses and the tree over them.
#[derive(Clone, Debug)]
pub struct CertificationIndex {
    config: HttpConfig,
    public_collections: BTreeSet<String>,
    cached: BTreeMap<String, CachedAsset>,
    routes: BTreeMap<String, Route>,
    leaves: Vec<((String, EncodingType), CertifiedResponse)>,
    tree: MerkleTree,
}

impl CertificationIndex {
    /// Create an empty index. Only assets of `public_collections` are served.
    pub fn new(config: HttpConfig, public_collections: impl IntoIterator<Item = String>) -> Self {
        let mut index = Self {
            config,
            public_collections: public_collections.into_iter().collect(),
            cached: BTreeMap::new(),
            routes: BTreeMap::new(),
            leaves: Vec::new(),
            tree: MerkleTree::default(),
        };
        index.rebuild();
        index
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Change which collections are served, recertifying everything.
    pub fn set_public_collections(
        &mut self,
        public_collections: impl IntoIterator<Item = String>,
        assets: &BTreeMap<String, Asset>,
    ) {
        self.public_collections = public_collections.into_iter().collect();
        self.refresh_all(assets);
    }

    /// Recertify every asset.
    pub fn refresh_all(&mut self, assets: &BTreeMap<String, Asset>) {
        self.cached.clear();
        for asset in assets.values() {
            self.cache(asset);
        }
        self.rebuild();
    }

    /// Recertify the given paths against the live asset map.
    ///
    /// Paths without a live asset lose their entries.
    pub fn refresh<'a>(
        &mut self,
        assets: &BTreeMap<String, Asset>,
        paths: impl IntoIterator<Item = &'a str>,
    ) {
        for path in paths {
            self.cached.remove(path);
            if let Some(asset) = assets.get(path) {
                self.cache(asset);
            }
        }
        self.rebuild();
    }

    /// The aggregate witness over all leaves.
    pub fn root(&self) -> ContentHash {
        self.tree.root()
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    /// Check if an asset path has certified responses.
    pub fn is_certified(&self, full_path: &str) -> bool {
        self.cached.contains_key(full_path)
    }

    /// Resolve a decoded request path to its key and route.
    ///
    /// Exact keys win, then the longest `/prefix/**` rewrite, then the
    /// not-found key.
    pub fn lookup(&self, path: &str) -> (&str, &Route) {
        if let Some((key, route)) = self.routes.get_key_value(path) {
            return (key.as_str(), route);
        }

        let wildcard = self
            .routes
            .iter()
            .filter_map(|(key, route)| {
                let prefix = glob::wildcard_prefix(key)?;
                path.starts_with(prefix).then_some((prefix.len(), key, route))
            })
            .max_by_key(|(len, _, _)| *len);
        if let Some((_, key, route)) = wildcard {
            return (key.as_str(), route);
        }

        self.routes
            .get_key_value(NOT_FOUND_KEY)
            .map(|(key, route)| (key.as_str(), route))
            .unwrap_or((NOT_FOUND_KEY, &FALLBACK_ROUTE))
    }

    /// The certified response of a key in one encoding.
    pub fn response(&self, key: &str, encoding: EncodingType) -> Option<&CertifiedResponse> {
        self.position(key, encoding).map(|i| &self.leaves[i].1)
    }

    /// Encodings a key is certified in.
    pub fn encodings(&self, key: &str) -> Vec<EncodingType> {
        self.leaves
            .iter()
            .filter(|((k, _), _)| k == key)
            .map(|((_, encoding), _)| *encoding)
            .collect()
    }

    /// Inclusion proof for a key in one encoding.
    pub fn witness(&self, key: &str, encoding: EncodingType) -> Option<MerkleProof> {
        self.position(key, encoding)
            .and_then(|i| self.tree.proof(i))
    }

    fn position(&self, key: &str, encoding: EncodingType) -> Option<usize> {
        self.leaves
            .binary_search_by(|((k, e), _)| (k.as_str(), *e).cmp(&(key, encoding)))
            .ok()
    }

    fn cache(&mut self, asset: &Asset) {
        if !self.public_collections.contains(&asset.key.collection) {
            return;
        }
        let responses = asset
            .encodings
            .iter()
            .map(|(encoding, stored)| {
                let headers = certified_headers(asset, *encoding, &self.config.headers);
                (
                    *encoding,
                    CertifiedResponse::new(200, headers, stored.sha256),
                )
            })
            .collect();
        self.cached
            .insert(asset.key.full_path.clone(), CachedAsset { responses });
    }

    /// Recompute routes, leaves and the tree from the cached responses.
    fn rebuild(&mut self) {
        let mut routes: BTreeMap<String, Route> = BTreeMap::new();

        for full_path in self.cached.keys() {
            routes.insert(
                full_path.clone(),
                Route::Asset {
                    full_path: full_path.clone(),
                },
            );
        }
        for full_path in self.cached.keys() {
            for alias in aliases(full_path) {
                routes.entry(alias).or_insert_with(|| Route::Asset {
                    full_path: full_path.clone(),
                });
            }
        }
        for (source, redirect) in &self.config.redirects {
            routes.insert(
                source.clone(),
                Route::Redirect {
                    location: redirect.location.clone(),
                    status_code: redirect.status_code,
                },
            );
        }
        for (source, destination) in &self.config.rewrites {
            if self.cached.contains_key(destination) {
                routes.entry(source.clone()).or_insert_with(|| Route::Asset {
                    full_path: destination.clone(),
                });
            }
        }
        let page = self
            .cached
            .contains_key(NOT_FOUND_PAGE)
            .then(|| NOT_FOUND_PAGE.to_string());
        routes.insert(NOT_FOUND_KEY.to_string(), Route::NotFound { page });

        let mut leaves = Vec::new();
        for (key, route) in &routes {
            match route {
                Route::Asset { full_path } => {
                    if let Some(cached) = self.cached.get(full_path) {
                        for (encoding, response) in &cached.responses {
                            leaves.push(((key.clone(), *encoding), response.clone()));
                        }
                    }
                }
                Route::Redirect {
                    location,
                    status_code,
                } => {
                    leaves.push((
                        (key.clone(), EncodingType::Identity),
                        CertifiedResponse::redirect(*status_code, location),
                    ));
                }
                Route::NotFound { page } => match page.as_ref().and_then(|p| self.cached.get(p)) {
                    Some(cached) => {
                        for (encoding, response) in &cached.responses {
                            leaves.push(((key.clone(), *encoding), response.with_status(404)));
                        }
                    }
                    None => leaves.push((
                        (key.clone(), EncodingType::Identity),
                        CertifiedResponse::not_found(),
                    )),
                },
            }
        }

        // BTreeMap iteration is ordered by key; encodings are ordered within a key.
        let tree = MerkleTree::build(
            leaves
                .iter()
                .map(|((key, encoding), response)| leaf_hash(key, *encoding, &response.hash()))
                .collect(),
        );

        tracing::debug!(
            routes = routes.len(),
            leaves = leaves.len(),
            root = %tree.root().to_hex(),
            "Rebuilt certification tree"
        );
        self.routes = routes;
        self.leaves = leaves;
        self.tree = tree;
    }
}

/// Extra request keys an asset answers to.
fn aliases(full_path: &str) -> Vec<String> {
    if let Some(dir) = full_path.strip_suffix("index.html")
        && dir.ends_with('/')
    {
        let mut out = vec![dir.to_string()];
        if dir.len() > 1 {
            out.push(dir.trim_end_matches('/').to_string());
        }
        return out;
    }
    match full_path.strip_suffix(".html") {
        Some(stem) if !stem.ends_with('/') && !stem.is_empty() => vec![stem.to_string()],
        _ => Vec::new(),
    }
}
