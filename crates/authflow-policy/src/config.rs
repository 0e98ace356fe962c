//! Timeout table, grace window, and the policy engine itself.

use std::time::Duration;

use authflow_token::{Role, RoleClass, UnixMillis};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

/// Configuration for the session policy engine.
///
/// The defaults encode the fixed timeout table:
///
/// | role class        | short  | extended (remember-me) |
/// |-------------------|--------|------------------------|
/// | admin / moderator | 30 min | 3 h                    |
/// | all other roles   | 3 h    | 14 days                |
///
/// One grace window covers every call site that tolerates a stale-looking
/// session right after login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Session length for privileged roles without remember-me.
    pub privileged_timeout: Duration,
    /// Session length for privileged roles with remember-me.
    pub privileged_extended: Duration,
    /// Session length for standard roles without remember-me.
    pub standard_timeout: Duration,
    /// Session length for standard roles with remember-me.
    pub standard_extended: Duration,
    /// How long after login/refresh an otherwise-invalid session is
    /// tolerated. Covers clock skew and the page-reload-right-after-login
    /// race.
    pub grace_window: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            privileged_timeout: Duration::from_secs(30 * 60),
            privileged_extended: Duration::from_secs(3 * 60 * 60),
            standard_timeout: Duration::from_secs(3 * 60 * 60),
            standard_extended: Duration::from_secs(14 * 24 * 60 * 60),
            grace_window: Duration::from_secs(5 * 60),
        }
    }
}

impl PolicyConfig {
    /// Fixes any inconsistent values so the config is safe to use.
    ///
    /// Called by [`SessionPolicy::new`]. The one rule: an extended timeout
    /// is never shorter than its short counterpart, so opting into
    /// remember-me can never shrink a session.
    pub fn validated(mut self) -> Self {
        if self.privileged_extended < self.privileged_timeout {
            warn!(
                extended_secs = self.privileged_extended.as_secs(),
                short_secs = self.privileged_timeout.as_secs(),
                "privileged extended timeout below short timeout, raising"
            );
            self.privileged_extended = self.privileged_timeout;
        }
        if self.standard_extended < self.standard_timeout {
            warn!(
                extended_secs = self.standard_extended.as_secs(),
                short_secs = self.standard_timeout.as_secs(),
                "standard extended timeout below short timeout, raising"
            );
            self.standard_extended = self.standard_timeout;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SessionPolicy
// ---------------------------------------------------------------------------

/// The policy engine: computes expiry instants and answers validity checks.
///
/// Deterministic for a given `(role, remember_me, now)`; construct one and
/// share it freely, it holds nothing but the config.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    config: PolicyConfig,
}

impl SessionPolicy {
    /// Creates a policy engine from config (validated first).
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    /// The session length for a role class and remember preference.
    pub fn timeout(&self, class: RoleClass, remember_me: bool) -> Duration {
        match (class, remember_me) {
            (RoleClass::Privileged, false) => self.config.privileged_timeout,
            (RoleClass::Privileged, true) => self.config.privileged_extended,
            (RoleClass::Standard, false) => self.config.standard_timeout,
            (RoleClass::Standard, true) => self.config.standard_extended,
        }
    }

    /// The expiry instant for a session created or extended at `now`.
    pub fn compute_expiry(
        &self,
        role: Role,
        remember_me: bool,
        now: UnixMillis,
    ) -> UnixMillis {
        now + self.timeout(role.class(), remember_me)
    }

    /// Whether a session with the given expiry is valid at `now`.
    ///
    /// The expiry instant itself is already invalid: a session is good up
    /// to, but not including, `expires_at + grace`. Pass
    /// `Duration::ZERO` for `grace` outside the post-login window.
    pub fn is_valid(
        &self,
        expires_at: UnixMillis,
        grace: Duration,
        now: UnixMillis,
    ) -> bool {
        now.get() < (expires_at + grace).get()
    }

    /// Whether `now` still falls inside the grace window that opened at
    /// `since` (a login or refresh instant). `None` means no window ever
    /// opened, so never in grace.
    pub fn in_grace_window(&self, since: Option<UnixMillis>, now: UnixMillis) -> bool {
        match since {
            Some(opened) => now.saturating_since(opened) < self.config.grace_window,
            None => false,
        }
    }

    /// The configured grace window duration.
    pub fn grace_window(&self) -> Duration {
        self.config.grace_window
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
