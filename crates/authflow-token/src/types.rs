//! Core shared types: identity, tokens, time, and emitted events.

use std::fmt;
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A wall-clock instant in milliseconds since the Unix epoch.
///
/// Every persisted timestamp (session expiry, login time) and every claim
/// comparison uses this type. It is a plain `i64` underneath so it
/// serializes as a number and survives a round-trip through string storage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixMillis(pub i64);

impl UnixMillis {
    /// Converts a unix timestamp in whole seconds (the `exp` claim format).
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// The raw millisecond value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: UnixMillis) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0).max(0) as u64)
    }
}

impl Add<Duration> for UnixMillis {
    type Output = UnixMillis;

    fn add(self, rhs: Duration) -> UnixMillis {
        UnixMillis(self.0.saturating_add(rhs.as_millis() as i64))
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of the current wall-clock time.
///
/// Injected wherever expiry is compared against "now" so that grace-window
/// and boundary behavior can be tested without sleeping. Production code
/// uses [`SystemClock`].
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> UnixMillis;
}

/// [`Clock`] backed by the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixMillis {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        UnixMillis(since_epoch.as_millis() as i64)
    }
}

/// [`Clock`] that only moves when told to.
///
/// For tests and simulations: clones share the same instant, so one copy
/// can be handed to the code under test and another kept to advance time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: std::sync::Arc<std::sync::atomic::AtomicI64>,
}

impl ManualClock {
    pub fn new(start: UnixMillis) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(start.get())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(
            by.as_millis() as i64,
            std::sync::atomic::Ordering::SeqCst,
        );
    }

    /// Jumps the clock to an absolute instant (may go backwards).
    pub fn set(&self, to: UnixMillis) {
        self.millis.store(to.get(), std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixMillis {
        UnixMillis(self.millis.load(std::sync::atomic::Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// The privilege role attached to a user account.
///
/// Serialized in kebab-case to match the server's wire format
/// (`"project-owner"`, not `"ProjectOwner"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    Moderator,
    ProjectOwner,
    Member,
}

impl Role {
    /// The timeout class this role belongs to.
    ///
    /// Admin and moderator accounts get short sessions; everyone else gets
    /// the standard timeouts.
    pub fn class(self) -> RoleClass {
        match self {
            Role::Admin | Role::Moderator => RoleClass::Privileged,
            Role::ProjectOwner | Role::Member => RoleClass::Standard,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Moderator => write!(f, "moderator"),
            Role::ProjectOwner => write!(f, "project-owner"),
            Role::Member => write!(f, "member"),
        }
    }
}

/// Privilege class used by the session timeout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleClass {
    /// Admin and moderator accounts: short timeouts.
    Privileged,
    /// All other roles: standard timeouts.
    Standard,
}

/// A cached snapshot of the authenticated user.
///
/// The authoritative copy lives server-side; this snapshot is refreshed on
/// every login and on any token refresh that returns a user payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// An opaque signed bearer token.
///
/// Three dot-separated base64url segments. Never mutated, only replaced
/// wholesale when the server issues a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An opaque longer-lived token used to obtain fresh access tokens.
///
/// Optional: the server may omit it and rely on bearer renewal instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

impl RefreshToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Server response DTOs
// ---------------------------------------------------------------------------

/// Response body of `POST /auth/login` and `POST /auth/signup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    pub user: User,
}

/// Response body of `POST /auth/refresh` and `POST /auth/renew`.
///
/// The bearer-renewal endpoint returns only a token; the refresh-token
/// endpoint may additionally rotate the refresh token and return an
/// updated user snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Response body of `GET /auth/session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCheck {
    pub valid: bool,
}

// ---------------------------------------------------------------------------
// Emitted events
// ---------------------------------------------------------------------------

/// Application-level authentication events.
///
/// Transient: emitted on a broadcast channel for UI collaborators, never
/// persisted. Each variant carries the relevant snapshot or nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A user authenticated in this process (login or signup).
    Login(User),
    /// The session ended, locally or via a cross-tab broadcast.
    Logout,
    /// A refresh produced a new access token. `user` is present only when
    /// the server returned an updated snapshot alongside the token.
    TokenRefreshed {
        token: AccessToken,
        user: Option<User>,
    },
    /// The current token or session was rejected as unusable.
    TokenInvalid,
    /// A refresh attempt failed transiently; state was left untouched.
    RefreshFailed,
}
