//! Persistent Key-Value Storage Abstraction
//!
//! Models origin-scoped persistent storage (browser `localStorage` on the web,
//! a preferences file or in-process map elsewhere) that every open tab of the
//! application shares.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A change made to the shared storage by another tab.
///
/// Mirrors the browser `storage` event: it is delivered to every tab of the
/// origin except the one that performed the write. Writing a value equal to
/// the current one produces no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key that changed.
    pub key: String,
    /// Value before the change, `None` if the key was absent.
    pub old_value: Option<String>,
    /// Value after the change, `None` if the key was removed.
    pub new_value: Option<String>,
}

impl StorageEvent {
    /// True when the key went from present to absent.
    pub fn is_removal(&self) -> bool {
        self.old_value.is_some() && self.new_value.is_none()
    }

    /// True when the key now holds a value that differs from the previous one.
    pub fn is_write(&self) -> bool {
        self.new_value.is_some()
    }
}

/// Stream of changes performed by other tabs.
pub type StorageEventStream = BoxStream<'static, StorageEvent>;

/// Key-value settings storage trait
///
/// Abstracts platform-specific persistent storage:
/// - Web: `localStorage`
/// - Desktop: Config files or an in-process shared map
///
/// Reads and writes from one tab are serialized by the host, so a single
/// `set_string`/`delete` is atomic with respect to other readers.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_token(store: &dyn SettingsStore, token: &str) -> Result<()> {
///     store.set_string("accessToken", token).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Subscribe to changes made by other tabs of the same origin.
    ///
    /// The subscription is live as soon as this returns; changes that happen
    /// before the stream is first polled are buffered.
    fn subscribe(&self) -> StorageEventStream;
}
