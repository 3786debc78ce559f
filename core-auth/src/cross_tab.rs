//! Cross-Tab Notifier
//!
//! Tabs of one origin share persistent storage but no memory. A logout is
//! announced by writing the expiration sentinel key and removing it at once;
//! the removal reaches every other tab as a storage change. Listeners react to
//! the sentinel removal, or to the access token disappearing, by dropping
//! their in-memory session. They never write back, so one logout cannot echo
//! between tabs.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use bridge_traits::storage::{SettingsStore, StorageEvent};
use bridge_traits::time::Clock;
use core_runtime::config::StorageKeys;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback run when another tab changes the session.
pub type SessionCallback = Arc<dyn Fn() + Send + Sync>;

/// Publish/subscribe seam for logout propagation between tabs.
#[async_trait]
pub trait LogoutBroadcast: Send + Sync {
    /// Tell every other tab that this one logged out.
    async fn notify_logout(&self) -> Result<()>;

    /// Run `callback` whenever another tab logs out.
    fn on_external_logout(&self, callback: SessionCallback) -> ListenerHandle;

    /// Run `callback` whenever another tab stores a fresh access token.
    fn on_external_login(&self, callback: SessionCallback) -> ListenerHandle;
}

/// Keeps a listener alive. Dropping it stops the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
        }
    }

    /// Stop listening now rather than when the handle goes out of scope.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`LogoutBroadcast`] over the shared [`SettingsStore`].
pub struct StorageLogoutBroadcast {
    storage: Arc<dyn SettingsStore>,
    keys: StorageKeys,
    clock: Arc<dyn Clock>,
}

impl StorageLogoutBroadcast {
    pub fn new(storage: Arc<dyn SettingsStore>, keys: StorageKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            keys,
            clock,
        }
    }

    fn listen(&self, kind: ListenerKind, callback: SessionCallback) -> ListenerHandle {
        // Subscribe before spawning so no change made after this call is missed.
        let mut changes = self.storage.subscribe();
        let storage = Arc::clone(&self.storage);
        let keys = self.keys.clone();

        ListenerHandle::spawn(async move {
            debug!(listener = ?kind, "Cross-tab listener started");
            while let Some(event) = changes.next().await {
                let fired = match kind {
                    ListenerKind::Logout => is_external_logout(&event, storage.as_ref(), &keys).await,
                    ListenerKind::Login => is_external_login(&event, &keys),
                };
                if fired {
                    info!(listener = ?kind, "Session changed in another tab");
                    callback();
                }
            }
            debug!(listener = ?kind, "Cross-tab listener finished");
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum ListenerKind {
    Logout,
    Login,
}

async fn is_external_logout(event: &StorageEvent, storage: &dyn SettingsStore, keys: &StorageKeys) -> bool {
    let relevant = event.key == keys.expiration_sentinel || event.key == keys.access_token;
    if !relevant || !event.is_removal() {
        return false;
    }
    // Another tab may have signed in again since.
    match storage.get_string(&keys.access_token).await {
        Ok(token) => token.map_or(true, |t| t.is_empty()),
        Err(e) => {
            warn!(error = %e, "Could not confirm logout from storage");
            true
        }
    }
}

fn is_external_login(event: &StorageEvent, keys: &StorageKeys) -> bool {
    event.key == keys.access_token
        && event.old_value.is_none()
        && event.new_value.as_deref().is_some_and(|v| !v.is_empty())
}

#[async_trait]
impl LogoutBroadcast for StorageLogoutBroadcast {
    async fn notify_logout(&self) -> Result<()> {
        let key = &self.keys.expiration_sentinel;
        let stamp = self.clock.unix_timestamp_millis().to_string();

        self.storage.set_string(key, &stamp).await.map_err(|e| {
            warn!(error = %e, "Failed to write logout sentinel");
            SessionError::StorageUnavailable(e.to_string())
        })?;
        self.storage.delete(key).await.map_err(|e| {
            warn!(error = %e, "Failed to remove logout sentinel");
            SessionError::StorageUnavailable(e.to_string())
        })?;

        debug!("Logout broadcast to other tabs");
        Ok(())
    }

    fn on_external_logout(&self, callback: SessionCallback) -> ListenerHandle {
        self.listen(ListenerKind::Logout, callback)
    }

    fn on_external_login(&self, callback: SessionCallback) -> ListenerHandle {
        self.listen(ListenerKind::Login, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemoryOrigin;
    use bridge_traits::time::FixedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn broadcast_for(origin: &MemoryOrigin) -> (Arc<dyn SettingsStore>, StorageLogoutBroadcast) {
        let tab: Arc<dyn SettingsStore> = Arc::new(origin.open_tab());
        let notifier = StorageLogoutBroadcast::new(
            Arc::clone(&tab),
            StorageKeys::default(),
            Arc::new(FixedClock::from_millis(1_700_000_000_000)),
        );
        (tab, notifier)
    }

    fn counter() -> (Arc<AtomicUsize>, SessionCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        (count, Arc::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_sentinel_written_then_removed() {
        let origin = MemoryOrigin::new();
        let (_tab, notifier) = broadcast_for(&origin);
        let observer = origin.open_tab();
        let mut changes = observer.subscribe();

        notifier.notify_logout().await.unwrap();

        let written = changes.next().await.unwrap();
        assert_eq!(written.key, "tokenExpired");
        assert_eq!(written.new_value.as_deref(), Some("1700000000000"));
        let removed = changes.next().await.unwrap();
        assert_eq!(removed.key, "tokenExpired");
        assert!(removed.is_removal());
        assert!(origin.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_other_tab_observes_logout() {
        let origin = MemoryOrigin::new();
        let (first_tab, first) = broadcast_for(&origin);
        let (_second_tab, second) = broadcast_for(&origin);
        first_tab.set_string("accessToken", "A1").await.unwrap();

        let (count, callback) = counter();
        let _listener = second.on_external_logout(callback);

        first_tab.delete("accessToken").await.unwrap();
        first.notify_logout().await.unwrap();
        settle().await;

        // Access token removal and sentinel removal each count.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_own_broadcast_is_not_observed() {
        let origin = MemoryOrigin::new();
        let (_tab, notifier) = broadcast_for(&origin);

        let (count, callback) = counter();
        let _listener = notifier.on_external_logout(callback);

        notifier.notify_logout().await.unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sentinel_ignored_while_still_logged_in() {
        let origin = MemoryOrigin::new();
        let (first_tab, first) = broadcast_for(&origin);
        let (_second_tab, second) = broadcast_for(&origin);
        first_tab.set_string("accessToken", "A2").await.unwrap();

        let (count, callback) = counter();
        let _listener = second.on_external_logout(callback);

        first.notify_logout().await.unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_external_login() {
        let origin = MemoryOrigin::new();
        let (first_tab, _first) = broadcast_for(&origin);
        let (_second_tab, second) = broadcast_for(&origin);

        let (count, callback) = counter();
        let _listener = second.on_external_login(callback);

        first_tab.set_string("accessToken", "A1").await.unwrap();
        // A refresh replaces the token; that is not a new login.
        first_tab.set_string("accessToken", "A2").await.unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_listener() {
        let origin = MemoryOrigin::new();
        let (first_tab, _first) = broadcast_for(&origin);
        let (_second_tab, second) = broadcast_for(&origin);
        first_tab.set_string("accessToken", "A1").await.unwrap();

        let (count, callback) = counter();
        let listener = second.on_external_logout(callback);
        assert!(listener.is_running());
        listener.stop();
        tokio::task::yield_now().await;

        first_tab.delete("accessToken").await.unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
