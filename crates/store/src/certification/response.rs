//! Canonical representation of a certified HTTP response.

use crate::glob;
use larder_core::config::HeaderRule;
use larder_core::{Asset, ContentHash, EncodingType, HeaderField};
use serde::{Deserialize, Serialize};

/// Headers never covered by certification.
const UNCERTIFIED_HEADERS: [&str; 3] = ["content-length", "x-certificate", "x-certificate-expression"];

/// Body of the built-in not-found response.
pub const NOT_FOUND_BODY: &[u8] = b"Not found";

/// What a certified response commits to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedResponse {
    pub status: u16,
    /// Lower-cased names, sorted.
    pub headers: Vec<HeaderField>,
    pub body_sha256: ContentHash,
}

impl CertifiedResponse {
    pub fn new(status: u16, headers: Vec<HeaderField>, body_sha256: ContentHash) -> Self {
        Self {
            status,
            headers: canonical_headers(headers),
            body_sha256,
        }
    }

    /// The built-in response for unmapped paths.
    pub fn not_found() -> Self {
        Self::new(
            404,
            vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            ContentHash::compute(NOT_FOUND_BODY),
        )
    }

    /// A redirect with an empty body.
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(
            status,
            vec![("location".to_string(), location.to_string())],
            ContentHash::compute(b""),
        )
    }

    /// The same response served under another status code.
    pub fn with_status(&self, status: u16) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Names of the certified headers, in canonical order.
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn hash(&self) -> ContentHash {
        response_hash(self.status, &self.headers, &self.body_sha256)
    }
}

/// Lower-case header names and sort, dropping headers certification skips.
pub fn canonical_headers(headers: Vec<HeaderField>) -> Vec<HeaderField> {
    let mut headers: Vec<HeaderField> = headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .filter(|(name, _)| !UNCERTIFIED_HEADERS.contains(&name.as_str()))
        .collect();
    headers.sort();
    headers
}

/// Hash of `(status, headers, body)`.
///
/// `headers` must already be canonical.
pub fn response_hash(status: u16, headers: &[HeaderField], body_sha256: &ContentHash) -> ContentHash {
    let mut hasher = ContentHash::hasher();
    hasher.update_field(b"larder-response-v1");
    hasher.update(&status.to_be_bytes());
    hasher.update(&(headers.len() as u64).to_be_bytes());
    for (name, value) in headers {
        hasher.update_field(name.as_bytes());
        hasher.update_field(value.as_bytes());
    }
    hasher.update(body_sha256.as_bytes());
    hasher.finalize()
}

/// Headers served, and certified, with one encoding of an asset.
pub fn certified_headers(
    asset: &Asset,
    encoding: EncodingType,
    rules: &[HeaderRule],
) -> Vec<HeaderField> {
    let content_type = asset
        .header("content-type")
        .unwrap_or_else(|| content_type_for(&asset.key.full_path));

    let mut headers: Vec<HeaderField> = vec![("content-type".to_string(), content_type.to_string())];
    if let Some(token) = encoding.content_encoding() {
        headers.push(("content-encoding".to_string(), token.to_string()));
    }

    let mut push = |name: &str, value: &str| {
        let name = name.to_ascii_lowercase();
        if !headers.iter().any(|(n, _)| *n == name) {
            headers.push((name, value.to_string()));
        }
    };
    for (name, value) in &asset.headers {
        push(name, value);
    }
    for rule in rules
        .iter()
        .filter(|rule| glob::matches(&rule.source, &asset.key.full_path))
    {
        for (name, value) in &rule.headers {
            push(name, value);
        }
    }

    canonical_headers(headers)
}

/// Guess a content type from the file extension.
pub fn content_type_for(full_path: &str) -> &'static str {
    let extension = full_path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("gz") => "application/gzip",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
