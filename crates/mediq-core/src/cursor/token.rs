use crate::{
    expr::{QueryShapeHash, Value},
    schema::{types::ResourceTypeId, version::SchemaVersion},
    serialize::{deserialize, serialize},
    surrogate::SurrogateId,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error as ThisError;

const TOKEN_VERSION_V1: u8 = 1;

/// Defensive decode bound for untrusted token input.
const MAX_TOKEN_HEX_LEN: usize = 8 * 1024;

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}

/// Decode a hex token string into raw bytes. Surrounding whitespace is
/// trimmed; everything else must be hex digits.
fn decode_hex(token: &str) -> Result<Vec<u8>, TokenError> {
    let token = token.trim();

    if token.is_empty() {
        return Err(TokenError::Empty);
    }
    if token.len() > MAX_TOKEN_HEX_LEN {
        return Err(TokenError::TooLong {
            len: token.len(),
            max: MAX_TOKEN_HEX_LEN,
        });
    }
    if token.len() % 2 != 0 {
        return Err(TokenError::OddLength);
    }
    if let Some(position) = token.bytes().position(|b| !b.is_ascii_hexdigit()) {
        return Err(TokenError::InvalidHex { position });
    }

    token
        .as_bytes()
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or(TokenError::InvalidHex { position: i * 2 })
        })
        .collect()
}

///
/// ContinuationSignature
///
/// Stable, deterministic hash binding a token to the query shape and schema
/// generation that produced it. Replaying a token against a different shape
/// is a client error, not a resume.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ContinuationSignature([u8; 32]);

impl ContinuationSignature {
    #[must_use]
    pub fn compute(shape: QueryShapeHash, schema_version: SchemaVersion) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"mediq:contsig:v1");
        hasher.update(shape.get().to_le_bytes());
        hasher.update(schema_version.0.to_le_bytes());

        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    #[must_use]
    pub fn as_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

///
/// SortResume
///
/// The sort-value slot of a token issued while a sorted search is active.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SortResume {
    /// Still paging through resources lacking the sort value.
    Missing,
    /// Sentinel: the missing-value phase is exhausted; switch to the
    /// present-value phase and discard the stale position.
    SwitchToPresent,
    /// Paging through resources with the sort value; resume after this one.
    Value(Value),
}

///
/// ContinuationToken
///
/// Keyset resume position: the last row returned, expressed as
/// `(resource type, surrogate id, optional sort state)`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContinuationToken {
    pub resource_type_id: ResourceTypeId,
    pub surrogate_id: SurrogateId,
    pub sort: Option<SortResume>,
    signature: ContinuationSignature,
}

#[derive(Deserialize, Serialize)]
struct TokenWire {
    version: u8,
    signature: ContinuationSignature,
    resource_type_id: ResourceTypeId,
    surrogate_id: SurrogateId,
    sort: Option<SortResume>,
}

impl ContinuationToken {
    #[must_use]
    pub const fn new(
        resource_type_id: ResourceTypeId,
        surrogate_id: SurrogateId,
        sort: Option<SortResume>,
        signature: ContinuationSignature,
    ) -> Self {
        Self {
            resource_type_id,
            surrogate_id,
            sort,
            signature,
        }
    }

    #[must_use]
    pub const fn signature(&self) -> ContinuationSignature {
        self.signature
    }

    /// Encode into the opaque external string form.
    pub fn encode(&self) -> Result<String, TokenError> {
        let wire = TokenWire {
            version: TOKEN_VERSION_V1,
            signature: self.signature,
            resource_type_id: self.resource_type_id,
            surrogate_id: self.surrogate_id,
            sort: self.sort.clone(),
        };
        let bytes = serialize(&wire).map_err(|err| TokenError::Malformed {
            reason: err.to_string(),
        })?;

        Ok(encode_hex(&bytes))
    }

    /// Decode and validate an externally supplied token.
    ///
    /// `expected` is the signature of the query being resumed; a token
    /// carrying any other signature was issued for a different search shape
    /// and is rejected.
    pub fn decode(token: &str, expected: ContinuationSignature) -> Result<Self, TokenError> {
        let bytes = decode_hex(token)?;
        let wire: TokenWire = deserialize(&bytes).map_err(|err| TokenError::Malformed {
            reason: err.to_string(),
        })?;

        if wire.version != TOKEN_VERSION_V1 {
            return Err(TokenError::UnsupportedVersion {
                version: wire.version,
            });
        }
        if wire.signature != expected {
            return Err(TokenError::ShapeMismatch);
        }

        Ok(Self {
            resource_type_id: wire.resource_type_id,
            surrogate_id: wire.surrogate_id,
            sort: wire.sort,
            signature: wire.signature,
        })
    }
}

///
/// TokenError
///
/// Client-facing continuation-token failures. Malformed tokens are rejected
/// outright, never guessed at.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TokenError {
    #[error("continuation token is empty")]
    Empty,

    #[error("continuation token exceeds max length: {len} hex chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("continuation token must have an even number of hex characters")]
    OddLength,

    #[error("invalid hex character at position {position}")]
    InvalidHex { position: usize },

    #[error("unsupported continuation token version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("malformed continuation token: {reason}")]
    Malformed { reason: String },

    #[error("continuation token does not match this query")]
    ShapeMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expression, Field};

    fn signature() -> ContinuationSignature {
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        ContinuationSignature::compute(shape, SchemaVersion::LATEST)
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0x00, 0x7f, 0xff, 0x10];
        let token = encode_hex(&bytes);
        assert_eq!(token, "007fff10");
        assert_eq!(decode_hex(&token).unwrap(), bytes);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(decode_hex("  "), Err(TokenError::Empty)));
        assert!(matches!(decode_hex("abc"), Err(TokenError::OddLength)));
        assert!(matches!(
            decode_hex("zz"),
            Err(TokenError::InvalidHex { position: 0 })
        ));
        assert!(matches!(
            decode_hex("ab+f"),
            Err(TokenError::InvalidHex { position: 2 })
        ));
    }

    #[test]
    fn round_trip_preserves_position() {
        let token = ContinuationToken::new(
            ResourceTypeId(4),
            SurrogateId(123_456_789),
            Some(SortResume::Missing),
            signature(),
        );

        let encoded = token.encode().unwrap();
        let decoded = ContinuationToken::decode(&encoded, signature()).unwrap();

        assert_eq!(decoded, token);
    }

    #[test]
    fn decode_rejects_foreign_shape() {
        let token = ContinuationToken::new(ResourceTypeId(4), SurrogateId(1), None, signature());
        let encoded = token.encode().unwrap();

        let other_shape = Expression::eq(Field::Uri, "y").shape_hash();
        let other = ContinuationSignature::compute(other_shape, SchemaVersion::LATEST);

        assert_eq!(
            ContinuationToken::decode(&encoded, other),
            Err(TokenError::ShapeMismatch)
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            ContinuationToken::decode("deadbeef", signature()),
            Err(TokenError::Malformed { .. })
        ));
    }

    #[test]
    fn schema_version_is_part_of_the_signature() {
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        let a = ContinuationSignature::compute(shape, SchemaVersion(27));
        let b = ContinuationSignature::compute(shape, SchemaVersion(54));

        assert_ne!(a, b);
    }
}
