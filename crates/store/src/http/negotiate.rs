//! `Accept-Encoding` negotiation.
//!
//! Quality values only exclude encodings (`q=0`); among the acceptable ones
//! the fixed preference order decides.

use larder_core::EncodingType;
use std::collections::BTreeMap;

/// Parsed `Accept-Encoding` header.
#[derive(Clone, Debug, Default)]
pub struct AcceptEncoding {
    explicit: BTreeMap<EncodingType, bool>,
    wildcard: Option<bool>,
}

impl AcceptEncoding {
    /// Parse a header value. Unknown codings are ignored.
    pub fn parse(header: &str) -> Self {
        let mut accept = Self::default();
        for item in header.split(',') {
            let mut parts = item.split(';');
            let token = parts.next().unwrap_or_default().trim();
            if token.is_empty() {
                continue;
            }
            let acceptable = parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .next()
                .is_none_or(|q| q.trim().parse::<f32>().is_ok_and(|q| q > 0.0));

            if token == "*" {
                accept.wildcard = Some(acceptable);
            } else if let Ok(encoding) = EncodingType::parse(token) {
                accept.explicit.insert(encoding, acceptable);
            }
        }
        accept
    }

    /// Check if the client takes `encoding`.
    ///
    /// Identity is acceptable unless excluded explicitly or through `*;q=0`.
    pub fn accepts(&self, encoding: EncodingType) -> bool {
        match (self.explicit.get(&encoding), self.wildcard) {
            (Some(acceptable), _) => *acceptable,
            (None, Some(acceptable)) => acceptable,
            (None, None) => encoding == EncodingType::Identity,
        }
    }
}

/// Pick the encoding to serve from those available.
///
/// Falls back to identity, then to any available encoding, when the client
/// accepts none of them. Returns `None` only if nothing is available.
pub fn choose(header: Option<&str>, available: &[EncodingType]) -> Option<EncodingType> {
    let accept = header.map(AcceptEncoding::parse).unwrap_or_default();
    EncodingType::PREFERENCE
        .iter()
        .copied()
        .find(|encoding| available.contains(encoding) && accept.accepts(*encoding))
        .or_else(|| {
            available
                .contains(&EncodingType::Identity)
                .then_some(EncodingType::Identity)
        })
        .or_else(|| available.first().copied())
}
