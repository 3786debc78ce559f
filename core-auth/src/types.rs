use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The credential pair held by the token store.
///
/// The refresh token is optional: a back end without a refresh flow issues an
/// access token alone, which is still a valid session.
///
/// # Examples
///
/// ```
/// use core_auth::TokenPair;
///
/// let pair = TokenPair::new("eyJ.access").with_refresh("eyJ.refresh");
/// assert_eq!(pair.refresh_token.as_deref(), Some("eyJ.refresh"));
///
/// // Tokens never show up in debug output
/// assert!(!format!("{:?}", pair).contains("eyJ"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Identity payload cached next to the credential pair.
///
/// Opaque to the session layer: it is stored and handed back, never
/// interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionProfile(Value);

impl SessionProfile {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for SessionProfile {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
