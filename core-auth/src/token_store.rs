//! Token Storage
//!
//! Owns the persisted credential pair and the cached profile. Nothing else in
//! the session layer writes these keys.
//!
//! ## Invariants
//!
//! - Stored state is either fully logged out (no access token, no refresh
//!   token) or logged in (access token present, refresh token optional).
//! - `set` never erases a key it was not given a value for, so an
//!   access-only update keeps the refresh token and vice versa.
//! - Writes within this tab are serialized; readers never observe a
//!   half-applied `set` or `clear`.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{TokenPair, TokenStore};
//! use core_runtime::config::StorageKeys;
//! use std::sync::Arc;
//! # use bridge_traits::storage::SettingsStore;
//! # async fn example(storage: Arc<dyn SettingsStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(storage, StorageKeys::default());
//!
//! token_store
//!     .set(&TokenPair::new("access").with_refresh("refresh"), None)
//!     .await?;
//! assert!(token_store.is_authenticated().await?);
//!
//! token_store.clear().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SessionError};
use crate::types::{SessionProfile, TokenPair};
use bridge_traits::storage::SettingsStore;
use core_runtime::config::StorageKeys;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Persistent store for the credential pair and cached profile.
///
/// Cloning yields another handle on the same storage and lock.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SettingsStore>,
    keys: Arc<StorageKeys>,
    lock: Arc<RwLock<()>>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SettingsStore>, keys: StorageKeys) -> Self {
        debug!("Initializing TokenStore");
        Self {
            storage,
            keys: Arc::new(keys),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Read the stored pair, `None` when logged out.
    pub async fn get(&self) -> Result<Option<TokenPair>> {
        let _guard = self.lock.read().await;

        let Some(access_token) = self.read_key(&self.keys.access_token).await? else {
            return Ok(None);
        };
        let refresh_token = self.read_key(&self.keys.refresh_token).await?;

        Ok(Some(TokenPair {
            access_token,
            refresh_token,
        }))
    }

    /// Persist a credential pair and optionally the profile.
    ///
    /// The access token is always written; the refresh token and profile only
    /// when provided.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidRequest` if the access token is empty
    /// - `SessionError::StorageUnavailable` if the host storage fails
    pub async fn set(&self, pair: &TokenPair, profile: Option<&SessionProfile>) -> Result<()> {
        if pair.access_token.is_empty() {
            return Err(SessionError::InvalidRequest(
                "Access token cannot be empty".to_string(),
            ));
        }

        let profile_json = profile.map(serde_json::to_string).transpose()?;

        let _guard = self.lock.write().await;

        // Access token first: a refresh token must never be visible without it.
        self.write_key(&self.keys.access_token, &pair.access_token)
            .await?;
        if let Some(refresh_token) = pair.refresh_token.as_deref() {
            self.write_key(&self.keys.refresh_token, refresh_token)
                .await?;
        }
        if let Some(json) = profile_json.as_deref() {
            self.write_key(&self.keys.profile, json).await?;
        }

        info!(
            has_refresh_token = pair.refresh_token.is_some(),
            has_profile = profile_json.is_some(),
            "Credentials stored"
        );

        Ok(())
    }

    /// Replace only the access token, keeping the refresh token and profile.
    pub async fn update_access_token(&self, access_token: &str) -> Result<()> {
        self.set(&TokenPair::new(access_token), None).await
    }

    /// Remove the credential pair and profile.
    ///
    /// Every key is attempted even if an earlier removal fails; the first
    /// failure is returned.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.write().await;

        // Access token last, so other tabs see the logout once everything is gone.
        let keys = [
            &self.keys.refresh_token,
            &self.keys.profile,
            &self.keys.access_token,
        ];

        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key = %key, error = %e, "Failed to remove credential key");
                first_error.get_or_insert(SessionError::StorageUnavailable(e.to_string()));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Credentials cleared");
                Ok(())
            }
        }
    }

    /// True when an access token is stored.
    pub async fn is_authenticated(&self) -> Result<bool> {
        Ok(self.access_token().await?.is_some())
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        self.read_key(&self.keys.access_token).await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        self.read_key(&self.keys.refresh_token).await
    }

    /// The cached profile. A corrupted entry is removed and reported as absent.
    pub async fn profile(&self) -> Result<Option<SessionProfile>> {
        let _guard = self.lock.read().await;

        let Some(json) = self.read_key(&self.keys.profile).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(error = %e, "Cached profile is corrupted, removing it");
                if let Err(e) = self.storage.delete(&self.keys.profile).await {
                    warn!(error = %e, "Failed to remove corrupted profile");
                }
                Ok(None)
            }
        }
    }

    async fn read_key(&self, key: &str) -> Result<Option<String>> {
        let value = self.storage.get_string(key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to read credential key");
            SessionError::StorageUnavailable(e.to_string())
        })?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn write_key(&self, key: &str, value: &str) -> Result<()> {
        self.storage.set_string(key, value).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to write credential key");
            SessionError::StorageUnavailable(e.to_string())
        })
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
