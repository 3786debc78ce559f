//! Session error types and server error message extraction.

use serde_json::Value;
use thiserror::Error;

/// Message used when an error payload carries nothing readable.
pub const FALLBACK_MESSAGE: &str = "An error occurred";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Token expired")]
    SessionExpired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        /// Parsed response body, `Value::Null` when it was not JSON.
        body: Value,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SessionError {
    /// True for the errors that end the session: expired credentials, an
    /// unrecoverable 401 and a failed refresh.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired
                | SessionError::AuthenticationFailed
                | SessionError::RefreshFailed(_)
        )
    }

    /// HTTP status of the response that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Builds an `Http` error whose message follows [`extract_message`].
    pub fn from_response(status: u16, body: Value, reason: Option<&str>) -> Self {
        let message = extract_message(&body, reason);
        SessionError::Http {
            status,
            message,
            body,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

/// Picks the human-readable message out of an error payload.
///
/// Priority: `message`, then `detail`, then `error` (string fields only), then
/// the generic error text, then [`FALLBACK_MESSAGE`].
///
/// ```
/// use core_auth::error::extract_message;
/// use serde_json::json;
///
/// let payload = json!({ "detail": "Not found.", "error": "missing" });
/// assert_eq!(extract_message(&payload, None), "Not found.");
/// assert_eq!(extract_message(&json!({}), Some("Bad Gateway")), "Bad Gateway");
/// assert_eq!(extract_message(&json!(null), None), "An error occurred");
/// ```
pub fn extract_message(payload: &Value, generic: Option<&str>) -> String {
    ["message", "detail", "error"]
        .iter()
        .filter_map(|field| payload.get(field).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .or_else(|| generic.map(str::trim).filter(|text| !text.is_empty()))
        .unwrap_or(FALLBACK_MESSAGE)
        .to_string()
}

pub type Result<T> = std::result::Result<T, SessionError>;
