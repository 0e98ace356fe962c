//! The reconnecting event stream client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{StreamConnection, StreamConnector, StreamEvent};

/// Configuration for the event stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Fixed delay between a connection failure and the reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

type Callback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Internal seam so [`Subscription`] can unregister without knowing the
/// connector type.
trait Registry: Send + Sync {
    fn unsubscribe(&self, event: &str, id: u64);
}

/// Handle to one registered listener. Dropping it unregisters the
/// listener; dropping the last one closes the connection.
pub struct Subscription {
    registry: Weak<dyn Registry>,
    event: String,
    id: u64,
}

impl Subscription {
    /// The event name this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.event, self.id);
        }
    }
}

struct ClientState {
    /// Listener registry: event name to callbacks by listener id.
    listeners: HashMap<String, HashMap<u64, Callback>>,
    next_id: u64,
    /// Total listeners across all event names; drives the lazy
    /// open / last-listener close lifecycle.
    total_listeners: usize,
    /// The current connection task, if any.
    connection: Option<JoinHandle<()>>,
    /// The single pending reconnect timer, if any. Replaced, never
    /// stacked.
    pending_reconnect: Option<JoinHandle<()>>,
}

struct Inner<C: StreamConnector> {
    connector: C,
    config: StreamConfig,
    state: Mutex<ClientState>,
}

/// Reconnecting client for the server-push event stream.
///
/// Cheap to clone; all clones share one connection and one registry.
pub struct EventStreamClient<C: StreamConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: StreamConnector> Clone for EventStreamClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: StreamConnector> EventStreamClient<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, StreamConfig::default())
    }

    pub fn with_config(connector: C, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: Mutex::new(ClientState {
                    listeners: HashMap::new(),
                    next_id: 1,
                    total_listeners: 0,
                    connection: None,
                    pending_reconnect: None,
                }),
            }),
        }
    }

    /// Registers a listener for one event name.
    ///
    /// The first registration across any name opens the connection; it
    /// stays up until the last [`Subscription`] is dropped. Must be
    /// called inside a tokio runtime.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> Subscription {
        let event = event.into();
        let mut state = self.inner.lock_state();
        let id = state.next_id;
        state.next_id += 1;
        state
            .listeners
            .entry(event.clone())
            .or_default()
            .insert(id, Arc::new(callback));
        state.total_listeners += 1;

        if state.connection.is_none() && state.pending_reconnect.is_none() {
            Inner::start_connection(&self.inner, &mut state);
        }

        let registry: Arc<dyn Registry> =
            Arc::clone(&self.inner) as Arc<dyn Registry>;
        Subscription {
            registry: Arc::downgrade(&registry),
            event,
            id,
        }
    }

    /// Tears everything down: connection, pending reconnect, listeners.
    /// Part of the converged sign-out path.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if let Some(connection) = state.connection.take() {
            connection.abort();
        }
        if let Some(pending) = state.pending_reconnect.take() {
            pending.abort();
        }
        state.listeners.clear();
        state.total_listeners = 0;
        debug!("event stream shut down");
    }

    /// Number of registered listeners across all event names.
    pub fn listener_count(&self) -> usize {
        self.inner.lock_state().total_listeners
    }

    /// Whether a connection task currently exists. `false` once the last
    /// listener is gone.
    pub fn connection_active(&self) -> bool {
        self.inner.lock_state().connection.is_some()
    }

    /// Whether a reconnect attempt is currently pending.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock_state().pending_reconnect.is_some()
    }
}

impl<C: StreamConnector> Inner<C> {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tears down any previous connection task and spawns a fresh one.
    /// Reconnects never resume; the connection is always recreated.
    fn start_connection(inner: &Arc<Self>, state: &mut ClientState) {
        if let Some(old) = state.connection.take() {
            old.abort();
        }
        let task_inner = Arc::clone(inner);
        state.connection = Some(tokio::spawn(async move {
            Inner::run_connection(task_inner).await;
        }));
    }

    async fn run_connection(inner: Arc<Self>) {
        match inner.connector.connect().await {
            Ok(mut connection) => {
                debug!("event stream connected");
                loop {
                    match connection.next_frame().await {
                        Ok(Some(frame)) => inner.dispatch(&frame),
                        Ok(None) => {
                            debug!("event stream closed by server");
                            break;
                        }
                        Err(error) => {
                            // The transport may surface more frames (or
                            // further errors) before the stream finally
                            // ends; each failure replaces the pending
                            // reconnect rather than stacking a new one.
                            warn!(%error, "event stream error");
                            Inner::schedule_reconnect(&inner);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(%error, "event stream connect failed");
            }
        }
        Inner::schedule_reconnect(&inner);
    }

    /// Schedules exactly one reconnect after the configured delay. An
    /// already-pending attempt is canceled and replaced.
    fn schedule_reconnect(inner: &Arc<Self>) {
        let mut state = inner.lock_state();
        if state.total_listeners == 0 {
            return;
        }
        if let Some(pending) = state.pending_reconnect.take() {
            pending.abort();
            debug!("replacing pending reconnect");
        }
        let task_inner = Arc::clone(inner);
        let delay = inner.config.reconnect_delay;
        state.pending_reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = task_inner.lock_state();
            state.pending_reconnect = None;
            if state.total_listeners > 0 {
                debug!("reconnecting event stream");
                Inner::start_connection(&task_inner, &mut state);
            }
        }));
    }

    /// Decodes one frame and fans it out to the listeners registered for
    /// its event name. A malformed frame is skipped; later frames are
    /// unaffected.
    fn dispatch(&self, raw: &str) {
        let event: StreamEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(error) => {
                debug!(%error, "skipping malformed stream frame");
                return;
            }
        };
        // Snapshot the callbacks so they run outside the lock; a callback
        // is allowed to subscribe or unsubscribe.
        let callbacks: Vec<Callback> = {
            let state = self.lock_state();
            state
                .listeners
                .get(&event.event)
                .map(|set| set.values().cloned().collect())
                .unwrap_or_default()
        };
        for callback in &callbacks {
            callback(&event.data);
        }
    }
}

impl<C: StreamConnector> Registry for Inner<C> {
    fn unsubscribe(&self, event: &str, id: u64) {
        let mut state = self.lock_state();
        let removed = state
            .listeners
            .get_mut(event)
            .map(|set| set.remove(&id).is_some())
            .unwrap_or(false);
        if !removed {
            return;
        }
        if state
            .listeners
            .get(event)
            .is_some_and(|set| set.is_empty())
        {
            state.listeners.remove(event);
        }
        state.total_listeners -= 1;
        if state.total_listeners == 0 {
            if let Some(connection) = state.connection.take() {
                connection.abort();
            }
            if let Some(pending) = state.pending_reconnect.take() {
                pending.abort();
            }
            debug!("last listener removed, event stream closed");
        }
    }
}
