//! Expiration Classifier
//!
//! Decides whether a server error body says the credential is expired or
//! invalid. Back ends disagree on the error shape, so the body is first read
//! into a typed [`ErrorPayload`] that tolerates every known convention (and
//! ignores fields of the wrong type), then checked by explicit predicates.
//!
//! Rules, first match wins:
//! 1. `code == "token_not_valid"`.
//! 2. Any entry of `messages` that is exactly `"Token is expired"`, has
//!    `token_type == "access"` with an expiry marker, or has
//!    `token_class == "AccessToken"` with a message containing "expired".
//! 3. A `detail` or `message` string mentioning "token" together with an
//!    expiry marker.
//!
//! Markers are "expired", "invalid" and "not valid", case-insensitive.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Machine-readable code for a rejected credential.
pub const TOKEN_NOT_VALID_CODE: &str = "token_not_valid";

const EXPIRED_ENTRY_MESSAGE: &str = "Token is expired";
const EXPIRY_MARKERS: &[&str] = &["expired", "invalid", "not valid"];

/// The recognized parts of an error body. Unknown fields are ignored.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub detail: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_messages")]
    pub messages: Vec<TokenMessage>,
}

/// One per-token entry of the `messages` list.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenMessage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub token_class: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
}

impl ErrorPayload {
    /// Reads a payload; anything that is not a JSON object yields an empty one.
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or_default()
    }

    /// Whether this payload reports an expired or invalid credential.
    pub fn is_token_expired(&self) -> bool {
        if self.code.as_deref() == Some(TOKEN_NOT_VALID_CODE) {
            return true;
        }

        if self.messages.iter().any(TokenMessage::reports_expired_access) {
            return true;
        }

        [self.detail.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .any(mentions_expired_token)
    }
}

impl TokenMessage {
    fn reports_expired_access(&self) -> bool {
        let Some(text) = self.message.as_deref() else {
            return false;
        };
        if text == EXPIRED_ENTRY_MESSAGE {
            return true;
        }

        let lower = text.to_lowercase();
        if self.token_type.as_deref() == Some("access") && has_expiry_marker(&lower) {
            return true;
        }
        self.token_class.as_deref() == Some("AccessToken") && lower.contains("expired")
    }
}

/// Classifies a raw response body.
///
/// ```
/// use core_auth::classifier::is_token_expired;
/// use serde_json::json;
///
/// assert!(is_token_expired(&json!({ "code": "token_not_valid" })));
/// assert!(is_token_expired(&json!({ "detail": "Token has EXPIRED" })));
/// assert!(!is_token_expired(&json!({ "detail": "Not found." })));
/// ```
pub fn is_token_expired(payload: &Value) -> bool {
    ErrorPayload::from_value(payload).is_token_expired()
}

fn has_expiry_marker(lower: &str) -> bool {
    EXPIRY_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn mentions_expired_token(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("token") && has_expiry_marker(&lower)
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_messages<'de, D>(deserializer: D) -> Result<Vec<TokenMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(entries) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .iter()
        .filter_map(|entry| TokenMessage::deserialize(entry).ok())
        .collect())
}
