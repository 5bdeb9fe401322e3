//! Serde helpers for binary payloads.
//!
//! Asset bodies and pending chunks are persisted inside JSON snapshots, so raw
//! buffers are written as standard base64 strings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

/// `#[serde(with = "base64_bytes")]` for a single [`Bytes`] buffer.
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "base64_bytes_vec")]` for an ordered list of buffers.
pub mod base64_bytes_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(value: &[Bytes], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for chunk in value {
            seq.serialize_element(&STANDARD.encode(chunk))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Bytes>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| {
                STANDARD
                    .decode(s)
                    .map(Bytes::from)
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::base64_bytes")]
        one: Bytes,
        #[serde(with = "super::base64_bytes_vec")]
        many: Vec<Bytes>,
    }

    #[test]
    fn test_buffers_written_as_base64() {
        let holder = Holder {
            one: Bytes::from_static(b"hi"),
            many: vec![Bytes::from_static(b"a"), Bytes::new()],
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["one"], "aGk=");
        assert_eq!(json["many"][0], "YQ==");
        assert_eq!(json["many"][1], "");

        let back: Holder = serde_json::from_value(json).unwrap();
        assert_eq!(back.one, holder.one);
        assert_eq!(back.many, holder.many);
    }
}
