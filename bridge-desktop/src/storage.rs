//! Shared In-Memory Storage
//!
//! A [`MemoryOrigin`] plays the part of one browser origin's `localStorage`:
//! every [`TabStorage`] opened from it reads and writes the same map, and each
//! write is announced to every *other* tab as a [`StorageEvent`].

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    storage::{SettingsStore, StorageEvent, StorageEventStream},
};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct OriginChange {
    source: Uuid,
    event: StorageEvent,
}

#[derive(Debug)]
struct OriginState {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<OriginChange>,
}

/// Storage shared by every tab of one origin.
#[derive(Debug, Clone)]
pub struct MemoryOrigin {
    state: Arc<OriginState>,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(OriginState {
                entries: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Open a new tab onto this origin.
    pub fn open_tab(&self) -> TabStorage {
        let tab_id = Uuid::new_v4();
        debug!(tab_id = %tab_id, "Opened storage tab");
        TabStorage {
            tab_id,
            state: Arc::clone(&self.state),
        }
    }

    /// Snapshot of every stored entry.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.state.entries.lock().await.clone()
    }
}

impl Default for MemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

/// One tab's handle onto a [`MemoryOrigin`].
#[derive(Debug, Clone)]
pub struct TabStorage {
    tab_id: Uuid,
    state: Arc<OriginState>,
}

impl TabStorage {
    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    fn announce(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        let change = OriginChange {
            source: self.tab_id,
            event: StorageEvent {
                key: key.to_string(),
                old_value,
                new_value,
            },
        };
        // No receivers simply means no other tab is listening.
        let _ = self.state.changes.send(change);
    }
}

#[async_trait]
impl SettingsStore for TabStorage {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.state.entries.lock().await;
        let old_value = entries.insert(key.to_string(), value.to_string());
        self.announce(key, old_value, Some(value.to_string()));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.state.entries.lock().await;
        let old_value = entries.remove(key);
        self.announce(key, old_value, None);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.state.entries.lock().await.keys().cloned().collect())
    }

    fn subscribe(&self) -> StorageEventStream {
        let receiver = self.state.changes.subscribe();
        let own_id = self.tab_id;

        stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) if change.source != own_id => return Some((change.event, receiver)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(tab_id = %own_id, missed, "Storage listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
