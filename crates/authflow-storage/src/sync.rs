//! Cross-tab synchronization: the Login and Logout broadcast channels.
//!
//! Two transports implement the same publish/subscribe interface:
//!
//! - [`StorageSync`] rides on the storage backend's change notifications.
//!   A publish writes one of the sentinel keys; every other tab observes
//!   the change and decodes it back into a [`SyncEvent`]. The writer does
//!   not hear its own broadcast, exactly like a browser storage event.
//! - [`LocalBus`] is a plain in-process bus for same-tab subscribers and
//!   for headless or test contexts where there are no other tabs.
//!
//! Receivers must apply events idempotently and must never re-publish
//! what they received; the transport has no loop detection of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use authflow_token::{Clock, User};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{keys, StorageBackend};

/// Capacity of each transport's fan-out channel.
const SYNC_CHANNEL_CAPACITY: usize = 16;

/// A cross-tab session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Another tab authenticated this user.
    Login(User),
    /// Another tab signed out.
    Logout,
}

/// Publish/subscribe interface for cross-tab session events.
pub trait SyncTransport: Send + Sync + 'static {
    /// Announces an event to the other tabs.
    fn publish(&self, event: &SyncEvent);

    /// A stream of events announced by other tabs.
    fn subscribe(&self) -> broadcast::Receiver<SyncEvent>;
}

// ---------------------------------------------------------------------------
// StorageSync
// ---------------------------------------------------------------------------

/// Wire format of the login sentinel.
///
/// The stamp makes consecutive broadcasts of the same user distinct;
/// without it, login / logout / login of one user would leave the sentinel
/// value unchanged and the second login would never notify anyone.
#[derive(Debug, Serialize, Deserialize)]
struct LoginEnvelope {
    stamp: String,
    user: User,
}

/// Storage-backed [`SyncTransport`] for multi-tab propagation.
///
/// Spawns a pump task translating sentinel-key changes into [`SyncEvent`]s;
/// must be constructed inside a tokio runtime. The pump is aborted on
/// drop.
pub struct StorageSync {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
    tx: broadcast::Sender<SyncEvent>,
    pump: JoinHandle<()>,
}

impl StorageSync {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        let mut changes = backend.watch();
        let pump_tx = tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                // Sentinel removals are cleanup, not broadcasts.
                let Some(value) = change.value else { continue };
                match change.key.as_str() {
                    keys::SYNC_LOGIN => {
                        match serde_json::from_str::<LoginEnvelope>(&value) {
                            Ok(envelope) => {
                                let _ = pump_tx.send(SyncEvent::Login(envelope.user));
                            }
                            Err(error) => {
                                warn!(%error, "ignoring malformed login broadcast");
                            }
                        }
                    }
                    keys::SYNC_LOGOUT => {
                        let _ = pump_tx.send(SyncEvent::Logout);
                    }
                    _ => {}
                }
            }
        });

        Self {
            backend,
            clock,
            seq: AtomicU64::new(0),
            tx,
            pump,
        }
    }

    /// A value that differs from every previous one written by this tab.
    fn stamp(&self) -> String {
        format!(
            "{}:{}",
            self.clock.now().get(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl Drop for StorageSync {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl SyncTransport for StorageSync {
    fn publish(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Login(user) => {
                let envelope = LoginEnvelope {
                    stamp: self.stamp(),
                    user: user.clone(),
                };
                match serde_json::to_string(&envelope) {
                    Ok(json) => self.backend.set(keys::SYNC_LOGIN, &json),
                    Err(error) => warn!(%error, "failed to serialize login broadcast"),
                }
            }
            SyncEvent::Logout => {
                self.backend.set(keys::SYNC_LOGOUT, &self.stamp());
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// LocalBus
// ---------------------------------------------------------------------------

/// In-process [`SyncTransport`].
///
/// Delivers published events to every subscriber in this process. Stands
/// in for "another tab" in tests and gives single-process deployments a
/// transport with no storage side effects.
pub struct LocalBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for LocalBus {
    fn publish(&self, event: &SyncEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}
