//! The derived session record.

use authflow_token::{Role, RoleClass, UnixMillis, User};
use tracing::warn;

use crate::SessionPolicy;

/// An ephemeral record of the current session's shape.
///
/// Derived from the token and the user's role; recomputed whenever either
/// changes and never persisted independently of its inputs. The invariant
/// on every (re)computation:
///
/// ```text
/// expires_at == now + timeout(role_class, remember_me)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// When this session stops being valid (absent a grace window).
    pub expires_at: UnixMillis,
    /// Whether the user opted into the extended timeout.
    pub remember_me: bool,
    /// Privilege class the timeout was computed from.
    pub role_class: RoleClass,
}

impl Session {
    /// Computes a fresh session starting at `now`.
    pub fn compute(
        role: Role,
        remember_me: bool,
        now: UnixMillis,
        policy: &SessionPolicy,
    ) -> Self {
        Self {
            expires_at: policy.compute_expiry(role, remember_me, now),
            remember_me,
            role_class: role.class(),
        }
    }

    /// Extends the sliding window: expiry becomes `now + timeout`.
    ///
    /// Called on observed user activity. Keeps the remember preference and
    /// role class; only the expiry moves.
    pub fn slide(&mut self, now: UnixMillis, policy: &SessionPolicy) {
        self.expires_at = now + policy.timeout(self.role_class, self.remember_me);
    }

    /// Rebuilds a session when the persisted expiry was unparsable but a
    /// user snapshot survived.
    ///
    /// Falls back to the short (non-remember) timeout for the user's role,
    /// which grants the session exactly one more validity check before it
    /// can be declared dead.
    pub fn recovered(user: &User, now: UnixMillis, policy: &SessionPolicy) -> Self {
        warn!(
            user = %user.id,
            "persisted session expiry unreadable, recomputing from defaults"
        );
        Self::compute(user.role, false, now, policy)
    }
}
