//! The storage keys owned by this subsystem.
//!
//! Other code must treat these keys as opaque and leave them alone; the
//! typed [`SessionStore`](crate::SessionStore) is the only writer.

/// The current access token.
pub const TOKEN: &str = "authflow.token";

/// The optional longer-lived refresh token.
pub const REFRESH_TOKEN: &str = "authflow.refresh_token";

/// The serialized user snapshot.
pub const USER: &str = "authflow.user";

/// Session expiry instant, unix milliseconds as a decimal string.
pub const SESSION_EXPIRY: &str = "authflow.session_expiry";

/// Remember-me preference, `"true"` / `"false"`.
pub const REMEMBER_ME: &str = "authflow.remember_me";

/// Instant of the last login or refresh; anchors the grace window.
pub const LOGIN_TIME: &str = "authflow.login_time";

/// Broadcast sentinel: serialized user payload announcing a login.
pub const SYNC_LOGIN: &str = "authflow.sync.login";

/// Broadcast sentinel: timestamp announcing a logout. The value only has
/// to differ from the previous one; the change notification is the event.
pub const SYNC_LOGOUT: &str = "authflow.sync.logout";

/// The session-state keys cleared on sign-out. The sentinels are not
/// state; clearing them would itself look like a broadcast to other tabs.
pub const STATE: [&str; 6] = [
    TOKEN,
    REFRESH_TOKEN,
    USER,
    SESSION_EXPIRY,
    REMEMBER_ME,
    LOGIN_TIME,
];

/// Every key this subsystem owns, session state and sentinels alike.
pub const OWNED: [&str; 8] = [
    TOKEN,
    REFRESH_TOKEN,
    USER,
    SESSION_EXPIRY,
    REMEMBER_ME,
    LOGIN_TIME,
    SYNC_LOGIN,
    SYNC_LOGOUT,
];
