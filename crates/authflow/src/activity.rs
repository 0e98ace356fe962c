//! The injected user-activity capability.
//!
//! The store never talks to a UI toolkit directly. Whatever hosts it
//! (a webview bridge, a TUI, a test) implements [`ActivitySource`] and
//! forwards pointer/keyboard/scroll/touch activity; the store uses the
//! signal to extend the sliding session window.

use tokio::sync::broadcast;

/// A kind of observed user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
}

/// Source of user-activity signals.
pub trait ActivitySource: Send + Sync + 'static {
    /// A stream of activity observations. Which kind occurred does not
    /// matter to the session policy; any activity extends the window.
    fn watch(&self) -> broadcast::Receiver<Activity>;
}

/// [`ActivitySource`] driven by explicit calls.
///
/// The headless implementation: hosts call [`record`](Self::record) from
/// their own input handling, and tests drive it directly.
pub struct ManualActivity {
    tx: broadcast::Sender<Activity>,
}

impl ManualActivity {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }

    /// Reports one observed interaction.
    pub fn record(&self, kind: Activity) {
        // No watchers is fine.
        let _ = self.tx.send(kind);
    }
}

impl Default for ManualActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for ManualActivity {
    fn watch(&self) -> broadcast::Receiver<Activity> {
        self.tx.subscribe()
    }
}
