//! Client-side verification of certified responses.

use super::{CERTIFICATE_HEADER, EXPRESSION_HEADER, HttpResponse};
use crate::certification::{MerkleProof, NOT_FOUND_KEY, canonical_headers, leaf_hash, response_hash};
use crate::glob;
use larder_core::{Certificate, ContentHash, EncodingType, HeaderField};
use larder_signer::{PublicKey, SignerError, verify_certificate};
use percent_encoding::percent_decode_str;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("malformed {header} header: {reason}")]
    Malformed { header: &'static str, reason: String },

    #[error("certificate signature: {0}")]
    Signature(#[from] SignerError),

    #[error("certified key {key:?} does not cover path {path:?}")]
    KeyMismatch { key: String, path: String },

    #[error("certified header {0} missing from response")]
    MissingCertifiedHeader(String),

    #[error("response does not match the certified root")]
    RootMismatch,
}

/// Fields of the `x-certificate` header.
struct CertificateHeader {
    certificate: Certificate,
    proof: MerkleProof,
}

/// Fields of the `x-certificate-expression` header.
struct Expression {
    key: String,
    encoding: EncodingType,
    headers: BTreeSet<String>,
}

/// Check a response against the signed root it carries.
///
/// `path` is the decoded request path and `body` the complete body, with
/// every streamed slice appended. Version 1 responses are checked against the
/// request path itself (or the not-found key for 404s); version 2 responses
/// name their key, encoding and certified headers.
pub fn verify_response(
    public_key: &PublicKey,
    path: &str,
    response: &HttpResponse,
    body: &[u8],
    version: u16,
) -> Result<(), VerifyError> {
    let header = parse_certificate(
        response
            .header(CERTIFICATE_HEADER)
            .ok_or(VerifyError::MissingHeader(CERTIFICATE_HEADER))?,
    )?;
    verify_certificate(&header.certificate, public_key)?;

    let (key, encoding, certified) = if version >= 2 {
        let expression = parse_expression(
            response
                .header(EXPRESSION_HEADER)
                .ok_or(VerifyError::MissingHeader(EXPRESSION_HEADER))?,
        )?;
        let certified = select_headers(&response.headers, &expression.headers)?;
        (expression.key, expression.encoding, certified)
    } else {
        let key = if response.status_code == 404 {
            NOT_FOUND_KEY.to_string()
        } else {
            path.to_string()
        };
        let encoding = match response.header("content-encoding") {
            Some(token) => EncodingType::parse(token).map_err(|e| VerifyError::Malformed {
                header: "content-encoding",
                reason: e.to_string(),
            })?,
            None => EncodingType::Identity,
        };
        (key, encoding, canonical_headers(response.headers.clone()))
    };

    if !key_covers(&key, path, response.status_code) {
        return Err(VerifyError::KeyMismatch {
            key,
            path: path.to_string(),
        });
    }

    let response_hash = response_hash(response.status_code, &certified, &ContentHash::compute(body));
    let leaf = leaf_hash(&key, encoding, &response_hash);
    match header.proof.root_for(leaf) {
        Some(root) if root == header.certificate.root => Ok(()),
        _ => Err(VerifyError::RootMismatch),
    }
}

/// Check that a certified key may answer a request for `path`.
fn key_covers(key: &str, path: &str, status: u16) -> bool {
    if key == path {
        return true;
    }
    if key == NOT_FOUND_KEY {
        return status == 404;
    }
    glob::wildcard_prefix(key).is_some_and(|prefix| path.starts_with(prefix))
}

fn select_headers(
    headers: &[HeaderField],
    names: &BTreeSet<String>,
) -> Result<Vec<HeaderField>, VerifyError> {
    let selected = canonical_headers(
        headers
            .iter()
            .filter(|(name, _)| names.contains(&name.to_ascii_lowercase()))
            .cloned()
            .collect(),
    );
    if let Some(missing) = names
        .iter()
        .find(|name| !selected.iter().any(|(n, _)| n == *name))
    {
        return Err(VerifyError::MissingCertifiedHeader(missing.clone()));
    }
    Ok(selected)
}

fn parse_certificate(value: &str) -> Result<CertificateHeader, VerifyError> {
    let malformed = |reason: &str| VerifyError::Malformed {
        header: CERTIFICATE_HEADER,
        reason: reason.to_string(),
    };

    let mut signature = None;
    let mut key_name = None;
    let mut root = None;
    let mut tree = None;
    for field in value.split(", ") {
        let (name, raw) = field.split_once('=').ok_or_else(|| malformed(field))?;
        let wrapped = || {
            raw.strip_prefix(':')
                .and_then(|v| v.strip_suffix(':'))
                .ok_or_else(|| malformed(name))
        };
        match name.trim() {
            "signature" => signature = Some(wrapped()?.to_string()),
            "key" => key_name = Some(raw.to_string()),
            "root" => {
                root = Some(ContentHash::from_base64(wrapped()?).map_err(|e| malformed(&e.to_string()))?)
            }
            "tree" => tree = Some(MerkleProof::from_base64(wrapped()?).ok_or_else(|| malformed("tree"))?),
            _ => {}
        }
    }

    Ok(CertificateHeader {
        certificate: Certificate {
            key_name: key_name.ok_or_else(|| malformed("missing key"))?,
            root: root.ok_or_else(|| malformed("missing root"))?,
            signature: signature.ok_or_else(|| malformed("missing signature"))?,
        },
        proof: tree.ok_or_else(|| malformed("missing tree"))?,
    })
}

fn parse_expression(value: &str) -> Result<Expression, VerifyError> {
    let malformed = |reason: &str| VerifyError::Malformed {
        header: EXPRESSION_HEADER,
        reason: reason.to_string(),
    };

    let mut fields = value.split(';').map(str::trim);
    if fields.next() != Some("default_certification") {
        return Err(malformed("unknown certification"));
    }

    let mut key = None;
    let mut encoding = None;
    let mut headers = None;
    for field in fields {
        let (name, raw) = field.split_once('=').ok_or_else(|| malformed(field))?;
        match name {
            "key" => {
                let decoded = percent_decode_str(raw)
                    .decode_utf8()
                    .map_err(|e| malformed(&e.to_string()))?;
                key = Some(decoded.into_owned());
            }
            "encoding" => {
                encoding = Some(EncodingType::parse(raw).map_err(|e| malformed(&e.to_string()))?)
            }
            "headers" => {
                headers = Some(
                    raw.split(',')
                        .filter(|name| !name.is_empty())
                        .map(str::to_ascii_lowercase)
                        .collect(),
                )
            }
            _ => {}
        }
    }

    Ok(Expression {
        key: key.ok_or_else(|| malformed("missing key"))?,
        encoding: encoding.ok_or_else(|| malformed("missing encoding"))?,
        headers: headers.ok_or_else(|| malformed("missing headers"))?,
    })
}
