//! Certified read path.
//!
//! Resolves a request against the certification index, picks an encoding,
//! and attaches the certificate headers that let a client check the served
//! bytes against the signed root. Large bodies are returned in slices with a
//! continuation token.

pub mod negotiate;
pub mod verify;

use crate::assets::AssetStore;
use crate::certification::{CertificationIndex, CertifiedResponse, NOT_FOUND_BODY, NOT_FOUND_KEY, Route};
use crate::error::{StoreError, StoreResult};
use crate::glob;
use bytes::Bytes;
use larder_core::{Asset, Certificate, ContentHash, EncodingType, HeaderField};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

pub use verify::{VerifyError, verify_response};

/// Header carrying the signed root and the inclusion proof.
pub const CERTIFICATE_HEADER: &str = "x-certificate";

/// Header naming the certified key, encoding and header subset.
pub const EXPRESSION_HEADER: &str = "x-certificate-expression";

/// Certificate version used when a request names none.
pub const DEFAULT_CERTIFICATE_VERSION: u16 = 2;

/// Characters escaped in the key of an expression header.
const KEY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'*');

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    /// Path plus optional query string.
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderField>,
    #[serde(default, with = "larder_core::codec::base64_bytes")]
    pub body: Bytes,
    /// 1 or 2; `None` means the default.
    #[serde(default)]
    pub certificate_version: Option<u16>,
}

impl HttpRequest {
    /// A GET request without headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Vec<HeaderField>,
    #[serde(with = "larder_core::codec::base64_bytes")]
    pub body: Bytes,
    pub streaming_strategy: Option<StreamingStrategy>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingStrategy {
    Callback { token: StreamingCallbackToken },
}

/// Where the next slice of a streamed body starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCallbackToken {
    pub full_path: String,
    pub encoding_type: EncodingType,
    /// Byte offset of the next slice.
    pub offset: u64,
    /// Hash of the encoding being streamed; the stream fails if it changes.
    pub sha256: ContentHash,
    /// Access token of the asset, carried from the original request.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCallbackResponse {
    #[serde(with = "larder_core::codec::base64_bytes")]
    pub body: Bytes,
    pub token: Option<StreamingCallbackToken>,
}

/// Serves requests from a snapshot of the asset store and its certificate.
pub struct HttpResponder<'a> {
    assets: &'a AssetStore,
    certificate: &'a Certificate,
    stream_chunk_size: u64,
}

impl<'a> HttpResponder<'a> {
    pub fn new(assets: &'a AssetStore, certificate: &'a Certificate, stream_chunk_size: u64) -> Self {
        Self {
            assets,
            certificate,
            stream_chunk_size: stream_chunk_size.max(1),
        }
    }

    fn index(&self) -> &'a CertificationIndex {
        self.assets.certification()
    }

    /// Answer one request.
    pub fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let (path, query_token) = split_url(&request.url);
        let version = match request.certificate_version {
            Some(1) => 1,
            _ => DEFAULT_CERTIFICATE_VERSION,
        };

        let (key, route) = match path.as_deref() {
            Some(path) => self.index().lookup(path),
            None => self.not_found_route(),
        };
        let (key, route) = match route {
            Route::Asset { full_path }
                if !self.token_matches(full_path, query_token.as_deref()) =>
            {
                self.not_found_route()
            }
            _ => (key, route),
        };
        // A version 1 proof is checked against the request path, which a
        // wildcard key never equals.
        let (key, route) = if version < 2 && glob::wildcard_prefix(key).is_some() {
            self.not_found_route()
        } else {
            (key, route)
        };

        let method = request.method.to_ascii_uppercase();
        let head = method == "HEAD";
        if !head && method != "GET" {
            if key == NOT_FOUND_KEY {
                return HttpResponse {
                    status_code: 404,
                    headers: Vec::new(),
                    body: Bytes::new(),
                    streaming_strategy: None,
                };
            }
            return HttpResponse {
                status_code: 405,
                headers: vec![("allow".to_string(), "GET, HEAD".to_string())],
                body: Bytes::new(),
                streaming_strategy: None,
            };
        }

        let encodings = self.index().encodings(key);
        let encoding = negotiate::choose(request.header("accept-encoding"), &encodings)
            .unwrap_or(EncodingType::Identity);

        let mut response = match route {
            Route::Asset { full_path } => self.serve_asset(key, full_path, encoding, query_token),
            Route::NotFound { page: Some(page) } => self.serve_asset(key, page, encoding, None),
            Route::Redirect { .. } | Route::NotFound { page: None } => {
                let body = match route {
                    Route::NotFound { .. } => Bytes::from_static(NOT_FOUND_BODY),
                    _ => Bytes::new(),
                };
                self.serve_fixed(key, encoding, body)
            }
        };

        self.attach_certificate(&mut response, key, encoding, version);
        if head {
            response.body = Bytes::new();
            response.streaming_strategy = None;
        }
        response
    }

    /// Next slice of a streamed body.
    pub fn stream(&self, token: &StreamingCallbackToken) -> StoreResult<StreamingCallbackResponse> {
        let stale = || StoreError::StaleStream(token.full_path.clone());

        let asset = self
            .assets
            .get_by_path(&token.full_path)
            .filter(|asset| self.index().is_certified(&asset.key.full_path))
            .filter(|asset| self.token_matches(&asset.key.full_path, token.token.as_deref()))
            .ok_or_else(stale)?;
        let encoding = asset
            .encodings
            .get(&token.encoding_type)
            .filter(|encoding| encoding.sha256 == token.sha256)
            .ok_or_else(stale)?;
        if token.offset >= encoding.total_length {
            return Err(stale());
        }

        let body = encoding.slice(token.offset, self.stream_chunk_size);
        let next = token.offset + body.len() as u64;
        let token = (next < encoding.total_length).then(|| StreamingCallbackToken {
            offset: next,
            ..token.clone()
        });
        Ok(StreamingCallbackResponse { body, token })
    }

    fn not_found_route(&self) -> (&'a str, &'a Route) {
        self.index().lookup(NOT_FOUND_KEY)
    }

    /// Assets with an access token are only served when the query names it.
    fn token_matches(&self, full_path: &str, presented: Option<&str>) -> bool {
        match self.assets.get_by_path(full_path).and_then(|a| a.key.token.as_deref()) {
            Some(required) => presented == Some(required),
            None => true,
        }
    }

    fn serve_asset(
        &self,
        key: &str,
        full_path: &str,
        encoding: EncodingType,
        access_token: Option<String>,
    ) -> HttpResponse {
        let certified = self.index().response(key, encoding);
        let stored = self
            .assets
            .get_by_path(full_path)
            .and_then(|asset: &Asset| asset.encodings.get(&encoding));
        let (Some(certified), Some(stored)) = (certified, stored) else {
            return self.serve_fixed(key, encoding, Bytes::new());
        };

        if stored.total_length <= self.stream_chunk_size {
            return HttpResponse {
                status_code: certified.status,
                headers: certified.headers.clone(),
                body: stored.body(),
                streaming_strategy: None,
            };
        }

        let body = stored.slice(0, self.stream_chunk_size);
        let token = StreamingCallbackToken {
            full_path: full_path.to_string(),
            encoding_type: encoding,
            offset: body.len() as u64,
            sha256: stored.sha256,
            token: access_token,
        };
        HttpResponse {
            status_code: certified.status,
            headers: certified.headers.clone(),
            body,
            streaming_strategy: Some(StreamingStrategy::Callback { token }),
        }
    }

    /// Responses whose body is not an asset: redirects and the built-in 404.
    fn serve_fixed(&self, key: &str, encoding: EncodingType, body: Bytes) -> HttpResponse {
        let certified = self
            .index()
            .response(key, encoding)
            .cloned()
            .unwrap_or_else(CertifiedResponse::not_found);
        HttpResponse {
            status_code: certified.status,
            headers: certified.headers,
            body,
            streaming_strategy: None,
        }
    }

    fn attach_certificate(
        &self,
        response: &mut HttpResponse,
        key: &str,
        encoding: EncodingType,
        version: u16,
    ) {
        let Some(proof) = self.index().witness(key, encoding) else {
            tracing::warn!(key, encoding = %encoding, "No witness for served response");
            return;
        };
        response.headers.push((
            CERTIFICATE_HEADER.to_string(),
            format!(
                "signature=:{}:, key={}, root=:{}:, tree=:{}:",
                self.certificate.signature,
                self.certificate.key_name,
                self.certificate.root.to_base64(),
                proof.to_base64()
            ),
        ));

        if version >= 2 {
            let names: Vec<&str> = response
                .headers
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| *name != CERTIFICATE_HEADER)
                .collect();
            response.headers.push((
                EXPRESSION_HEADER.to_string(),
                format!(
                    "default_certification; key={}; encoding={}; headers={}",
                    utf8_percent_encode(key, KEY_SET),
                    encoding,
                    names.join(",")
                ),
            ));
        }
    }
}

/// Decode the path of a request URL and extract its `token` query parameter.
///
/// The path is `None` when it is not valid percent-encoded UTF-8.
fn split_url(url: &str) -> (Option<String>, Option<String>) {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let path = percent_decode_str(path)
        .decode_utf8()
        .ok()
        .map(|path| path.into_owned());

    let token = query.and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "token")
            .and_then(|(_, value)| percent_decode_str(value).decode_utf8().ok())
            .map(|value| value.into_owned())
    });
    (path, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetWrite;
    use crate::certification::CertificationIndex;
    use crate::reserved::Channel;
    use larder_core::config::{HttpConfig, RedirectRule};
    use larder_core::{AssetEncoding, AssetKey, Caller, CallerId, DAPP_COLLECTION, Scope};
    use larder_signer::CertificateSigner;
    use time::OffsetDateTime;

    struct Fixture {
        assets: AssetStore,
        signer: CertificateSigner,
        certificate: Certificate,
    }

    impl Fixture {
        fn new(config: HttpConfig) -> Self {
            let assets = AssetStore::new(CertificationIndex::new(
                config,
                [DAPP_COLLECTION.to_string()],
            ));
            let signer = CertificateSigner::generate("test-1");
            let certificate = signer.sign_root(&assets.certification().root());
            Self {
                assets,
                signer,
                certificate,
            }
        }

        fn put(&mut self, path: &str, encoding_type: EncodingType, body: &[u8], token: Option<&str>) {
            let caller = Caller::controller("ci", Scope::Admin);
            let expected_version = self.assets.get_by_path(path).map(|a| a.version);
            self.assets
                .put(
                    AssetWrite {
                        key: AssetKey {
                            full_path: path.to_string(),
                            collection: DAPP_COLLECTION.to_string(),
                            owner: CallerId::new("ci"),
                            token: token.map(str::to_string),
                            name: path.to_string(),
                            description: None,
                        },
                        headers: Vec::new(),
                        encoding_type,
                        encoding: AssetEncoding::from_chunks(
                            vec![Bytes::copy_from_slice(body)],
                            OffsetDateTime::UNIX_EPOCH,
                        ),
                        expected_version,
                    },
                    Channel::Direct { caller: &caller },
                    OffsetDateTime::UNIX_EPOCH,
                )
                .unwrap();
            self.certificate = self.signer.sign_root(&self.assets.certification().root());
        }

        fn responder(&self, chunk: u64) -> HttpResponder<'_> {
            HttpResponder::new(&self.assets, &self.certificate, chunk)
        }

        fn verify(&self, url: &str, response: &HttpResponse, body: &[u8], version: u16) {
            let path = split_url(url).0.unwrap();
            verify_response(self.signer.public_key(), &path, response, body, version).unwrap();
        }
    }

    #[test]
    fn test_serves_certified_asset() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/hello.html", EncodingType::Identity, b"<html>Hello</html>", None);

        let response = fx.responder(1024).respond(&HttpRequest::get("/hello.html"));
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_ref(), b"<html>Hello</html>");
        assert_eq!(
            response.header("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert!(response.header(EXPRESSION_HEADER).is_some());
        fx.verify("/hello.html", &response, b"<html>Hello</html>", 2);
    }

    #[test]
    fn test_unmapped_path_is_certified_404() {
        let fx = Fixture::new(HttpConfig::default());
        let response = fx.responder(1024).respond(&HttpRequest::get("/missing"));
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body.as_ref(), NOT_FOUND_BODY);
        fx.verify("/missing", &response, NOT_FOUND_BODY, 2);
    }

    #[test]
    fn test_custom_404_page() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/404.html", EncodingType::Identity, b"gone", None);
        let response = fx.responder(1024).respond(&HttpRequest::get("/nope"));
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body.as_ref(), b"gone");
        fx.verify("/nope", &response, b"gone", 2);
    }

    #[test]
    fn test_directory_index_and_html_alias() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/docs/index.html", EncodingType::Identity, b"docs", None);
        fx.put("/about.html", EncodingType::Identity, b"about", None);
        let responder = fx.responder(1024);

        for (url, body) in [("/docs/", b"docs" as &[u8]), ("/docs", b"docs"), ("/about", b"about")] {
            let response = responder.respond(&HttpRequest::get(url));
            assert_eq!(response.status_code, 200, "{url}");
            assert_eq!(response.body.as_ref(), body);
            fx.verify(url, &response, body, 2);
        }
    }

    #[test]
    fn test_method_handling() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/index.html", EncodingType::Identity, b"home", None);
        let responder = fx.responder(1024);

        let post = HttpRequest {
            method: "POST".to_string(),
            ..HttpRequest::get("/index.html")
        };
        let response = responder.respond(&post);
        assert_eq!(response.status_code, 405);
        assert_eq!(response.header("allow"), Some("GET, HEAD"));

        let post_unmapped = HttpRequest {
            method: "POST".to_string(),
            ..HttpRequest::get("/unknown")
        };
        assert_eq!(responder.respond(&post_unmapped).status_code, 404);

        let head = HttpRequest {
            method: "HEAD".to_string(),
            ..HttpRequest::get("/index.html")
        };
        let response = responder.respond(&head);
        assert_eq!(response.status_code, 200);
        assert!(response.body.is_empty());
        fx.verify("/index.html", &response, b"home", 2);
    }

    #[test]
    fn test_negotiates_encoding() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/app.js", EncodingType::Identity, b"plain", None);
        fx.put("/app.js", EncodingType::Gzip, b"gzipped", None);
        let responder = fx.responder(1024);

        let request = HttpRequest::get("/app.js").with_header("Accept-Encoding", "gzip, br");
        let response = responder.respond(&request);
        assert_eq!(response.header("content-encoding"), Some("gzip"));
        assert_eq!(response.body.as_ref(), b"gzipped");
        fx.verify("/app.js", &response, b"gzipped", 2);

        let response = responder.respond(&HttpRequest::get("/app.js"));
        assert_eq!(response.header("content-encoding"), None);
        assert_eq!(response.body.as_ref(), b"plain");
    }

    #[test]
    fn test_redirects() {
        let mut config = HttpConfig::default();
        config.redirects.insert(
            "/old".to_string(),
            RedirectRule {
                location: "/new".to_string(),
                status_code: 301,
            },
        );
        let fx = Fixture::new(config);
        let response = fx.responder(1024).respond(&HttpRequest::get("/old"));
        assert_eq!(response.status_code, 301);
        assert_eq!(response.header("location"), Some("/new"));
        fx.verify("/old", &response, b"", 2);
    }

    #[test]
    fn test_wildcard_rewrite() {
        let mut config = HttpConfig::default();
        config
            .rewrites
            .insert("/app/**".to_string(), "/app.html".to_string());
        let mut fx = Fixture::new(config);
        fx.put("/app.html", EncodingType::Identity, b"spa", None);

        let response = fx.responder(1024).respond(&HttpRequest::get("/app/users/42"));
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_ref(), b"spa");
        fx.verify("/app/users/42", &response, b"spa", 2);
    }

    #[test]
    fn test_wildcard_rewrite_is_not_found_for_v1() {
        let mut config = HttpConfig::default();
        config
            .rewrites
            .insert("/app/**".to_string(), "/app.html".to_string());
        let mut fx = Fixture::new(config);
        fx.put("/app.html", EncodingType::Identity, b"spa", None);

        let request = HttpRequest {
            certificate_version: Some(1),
            ..HttpRequest::get("/app/x")
        };
        let response = fx.responder(1024).respond(&request);
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body.as_ref(), NOT_FOUND_BODY);
        fx.verify("/app/x", &response, NOT_FOUND_BODY, 1);

        // The rewritten asset itself still verifies under v1.
        let request = HttpRequest {
            certificate_version: Some(1),
            ..HttpRequest::get("/app.html")
        };
        let response = fx.responder(1024).respond(&request);
        assert_eq!(response.status_code, 200);
        fx.verify("/app.html", &response, b"spa", 1);
    }

    #[test]
    fn test_percent_decoded_path_and_query() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/a b.txt", EncodingType::Identity, b"space", None);
        let response = fx.responder(1024).respond(&HttpRequest::get("/a%20b.txt?x=1"));
        assert_eq!(response.status_code, 200);
        fx.verify("/a%20b.txt?x=1", &response, b"space", 2);
    }

    #[test]
    fn test_token_gated_asset() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/private.txt", EncodingType::Identity, b"secret", Some("abc"));
        let responder = fx.responder(1024);

        assert_eq!(
            responder.respond(&HttpRequest::get("/private.txt")).status_code,
            404
        );
        assert_eq!(
            responder
                .respond(&HttpRequest::get("/private.txt?token=wrong"))
                .status_code,
            404
        );
        let response = responder.respond(&HttpRequest::get("/private.txt?token=abc"));
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_ref(), b"secret");
    }

    #[test]
    fn test_streams_large_bodies() {
        let mut fx = Fixture::new(HttpConfig::default());
        let body: Vec<u8> = (0..25u8).collect();
        fx.put("/big.bin", EncodingType::Identity, &body, None);
        let responder = fx.responder(10);

        let response = responder.respond(&HttpRequest::get("/big.bin"));
        assert_eq!(response.body.as_ref(), &body[..10]);
        let Some(StreamingStrategy::Callback { token }) = response.streaming_strategy.clone() else {
            panic!("expected a streaming token");
        };

        let mut collected = response.body.to_vec();
        let mut next = Some(token);
        while let Some(token) = next {
            let slice = responder.stream(&token).unwrap();
            collected.extend_from_slice(&slice.body);
            next = slice.token;
        }
        assert_eq!(collected, body);
        fx.verify("/big.bin", &response, &collected, 2);
    }

    #[test]
    fn test_stream_fails_when_asset_changes() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/big.bin", EncodingType::Identity, &[1u8; 30], None);
        let response = fx.responder(10).respond(&HttpRequest::get("/big.bin"));
        let Some(StreamingStrategy::Callback { token }) = response.streaming_strategy else {
            panic!("expected a streaming token");
        };

        fx.put("/big.bin", EncodingType::Identity, &[2u8; 30], None);
        assert!(matches!(
            fx.responder(10).stream(&token),
            Err(StoreError::StaleStream(_))
        ));
    }

    #[test]
    fn test_certificate_v1_has_no_expression() {
        let mut fx = Fixture::new(HttpConfig::default());
        fx.put("/hello.html", EncodingType::Identity, b"hi", None);
        let request = HttpRequest {
            certificate_version: Some(1),
            ..HttpRequest::get("/hello.html")
        };
        let response = fx.responder(1024).respond(&request);
        assert!(response.header(CERTIFICATE_HEADER).is_some());
        assert!(response.header(EXPRESSION_HEADER).is_none());
        fx.verify("/hello.html", &response, b"hi", 1);
    }
}
