//! Storage backend abstraction and the in-memory multi-handle store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Counter for assigning unique handle (tab) identifiers.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Capacity of the change-notification channel per store.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A change to one storage key, as observed by other handles.
#[derive(Debug, Clone)]
pub struct StorageChange {
    /// The key that was written or removed.
    pub key: String,
    /// The new value, or `None` when the key was removed.
    pub value: Option<String>,
    /// Which handle performed the write. Used to filter same-tab echoes.
    pub(crate) origin: u64,
}

/// Origin-scoped shared key/value storage.
///
/// Semantics mirror browser local storage: values are strings, writes are
/// durable for the lifetime of the store, and a write is observable as a
/// change notification by every handle *except* the writer. A write that
/// leaves a key's value unchanged produces no notification, which is why
/// broadcast sentinels carry a fresh timestamp each time.
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads a key. `None` if absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a key. Notifies other handles if the value changed.
    fn set(&self, key: &str, value: &str);

    /// Removes a key. Notifies other handles if it existed.
    fn remove(&self, key: &str);

    /// A stream of changes made by *other* handles of this store.
    fn watch(&self) -> StorageEvents;
}

/// Receiver half of a storage change subscription.
///
/// Filters out the subscriber's own writes, so what comes out of
/// [`recv`](Self::recv) is exactly what a browser tab would see from its
/// storage event listener: other tabs' mutations only.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageChange>,
    local_origin: u64,
}

impl StorageEvents {
    /// Wraps a raw change receiver, filtering events from `local_origin`.
    pub fn new(rx: broadcast::Receiver<StorageChange>, local_origin: u64) -> Self {
        Self { rx, local_origin }
    }

    /// The next change made by another handle. `None` when the store is
    /// gone. A lagged receiver skips ahead rather than erroring; cross-tab
    /// state is eventually consistent and the latest write wins anyway.
    pub async fn recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == self.local_origin => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "storage watcher lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

struct Shared {
    map: Mutex<HashMap<String, String>>,
    tx: broadcast::Sender<StorageChange>,
}

/// In-memory [`StorageBackend`].
///
/// One underlying store can be viewed through any number of handles; each
/// handle has its own identity for change filtering. Cloning a handle
/// keeps the same identity (same tab); [`new_handle`](Self::new_handle)
/// creates a distinct identity (another tab of the same origin).
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    handle_id: u64,
}

impl MemoryStorage {
    /// Creates a fresh, empty store with one handle.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                map: Mutex::new(HashMap::new()),
                tx,
            }),
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// A new handle over the same store, modeling another tab: it sees
    /// this handle's writes as change notifications, and vice versa.
    pub fn new_handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn notify(&self, key: &str, value: Option<String>) {
        // No subscribers is fine; broadcast::send only errors then.
        let _ = self.shared.tx.send(StorageChange {
            key: key.to_string(),
            value,
            origin: self.handle_id,
        });
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map mutex means a writer panicked mid-insert; the map
        // itself is still structurally sound for string inserts.
        self.shared
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.lock_map().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let changed = {
            let mut map = self.lock_map();
            match map.insert(key.to_string(), value.to_string()) {
                Some(previous) => previous != value,
                None => true,
            }
        };
        if changed {
            self.notify(key, Some(value.to_string()));
        }
    }

    fn remove(&self, key: &str) {
        let existed = self.lock_map().remove(key).is_some();
        if existed {
            self.notify(key, None);
        }
    }

    fn watch(&self) -> StorageEvents {
        StorageEvents::new(self.shared.tx.subscribe(), self.handle_id)
    }
}
