//! Continuation tokens for paged search results.
//!
//! The query compiler only needs to turn the opaque `ct` parameter back into
//! a position in the result set; how that position is encoded is decided by a
//! [`ContinuationTokenCodec`].

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// The position in a result set where the next page starts.
///
/// # Encoding
///
/// With [`Base64ContinuationTokenCodec`] tokens are base64-encoded JSON
/// containing:
/// - Sort key values of the last returned row
/// - The surrogate id of the last returned resource, for tie-breaking
/// - A format version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationToken {
    /// Token format version.
    #[serde(default = "default_version")]
    version: u8,

    /// The sort key values at the token position.
    sort_values: Vec<CursorValue>,

    /// Surrogate id of the last returned resource.
    resource_surrogate_id: i64,
}

fn default_version() -> u8 {
    1
}

/// A value in the token for sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    /// String value.
    String(String),
    /// Numeric value.
    Number(i64),
    /// Decimal value.
    Decimal(f64),
    /// Boolean value.
    Boolean(bool),
    /// Null value.
    Null,
}

impl ContinuationToken {
    /// Creates a new token at the given position.
    pub fn new(sort_values: Vec<CursorValue>, resource_surrogate_id: i64) -> Self {
        Self {
            version: 1,
            sort_values,
            resource_surrogate_id,
        }
    }

    /// Returns the sort values.
    pub fn sort_values(&self) -> &[CursorValue] {
        &self.sort_values
    }

    /// Returns the surrogate id of the last returned resource.
    pub fn resource_surrogate_id(&self) -> i64 {
        self.resource_surrogate_id
    }
}

impl From<&str> for CursorValue {
    fn from(s: &str) -> Self {
        CursorValue::String(s.to_string())
    }
}

impl From<String> for CursorValue {
    fn from(s: String) -> Self {
        CursorValue::String(s)
    }
}

impl From<i64> for CursorValue {
    fn from(n: i64) -> Self {
        CursorValue::Number(n)
    }
}

impl From<f64> for CursorValue {
    fn from(n: f64) -> Self {
        CursorValue::Decimal(n)
    }
}

impl From<bool> for CursorValue {
    fn from(b: bool) -> Self {
        CursorValue::Boolean(b)
    }
}

/// Encodes and decodes opaque continuation tokens.
pub trait ContinuationTokenCodec: Send + Sync {
    /// Decodes a token received from a client.
    fn decode(&self, token: &str) -> Result<ContinuationToken, SearchError>;

    /// Encodes a token to hand back to a client.
    fn encode(&self, token: &ContinuationToken) -> String;
}

/// URL-safe base64 over JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64ContinuationTokenCodec;

impl ContinuationTokenCodec for Base64ContinuationTokenCodec {
    fn decode(&self, token: &str) -> Result<ContinuationToken, SearchError> {
        let invalid = || SearchError::InvalidContinuationToken {
            token: token.to_string(),
        };

        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }

    fn encode(&self, token: &ContinuationToken) -> String {
        let json = serde_json::to_vec(token).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_encode_decode() {
        let codec = Base64ContinuationTokenCodec;
        let token = ContinuationToken::new(vec!["Smith".into(), 42i64.into()], 5_104_000_000_000);

        let encoded = codec.encode(&token);
        assert!(!encoded.contains('='));

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.resource_surrogate_id(), 5_104_000_000_000);
        assert_eq!(decoded.sort_values().len(), 2);
    }

    #[test]
    fn test_invalid_token() {
        let codec = Base64ContinuationTokenCodec;
        assert!(matches!(
            codec.decode("not-valid!!"),
            Err(SearchError::InvalidContinuationToken { .. })
        ));

        // Valid base64 but not a token
        let garbage = URL_SAFE_NO_PAD.encode(b"{\"foo\":1}");
        assert!(codec.decode(&garbage).is_err());
    }
}
