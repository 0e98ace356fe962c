//! Typed persistence layer over the raw storage backend.

use std::sync::Arc;

use authflow_token::{AccessToken, RefreshToken, UnixMillis, User};
use tracing::warn;

use crate::{keys, StorageBackend, StorageError};

/// What a tab finds in storage when it starts up.
///
/// `expires_at` is `None` when the persisted expiry was missing or
/// unparsable; the policy layer then rebuilds a default expiry from the
/// user snapshot (one recovery attempt before the session is declared
/// dead).
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub user: User,
    pub expires_at: Option<UnixMillis>,
    pub remember_me: bool,
    pub login_time: Option<UnixMillis>,
}

/// The only reader and writer of the session keys.
///
/// Every method that stores a token stores the session expiry in the same
/// call, so no reader can observe one without the other.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// The underlying backend, for wiring sync transports over the same
    /// store.
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    /// Persists the full state of a fresh login (or signup).
    pub fn persist_login(
        &self,
        token: &AccessToken,
        refresh_token: Option<&RefreshToken>,
        user: &User,
        expires_at: UnixMillis,
        remember_me: bool,
        login_time: UnixMillis,
    ) -> Result<(), StorageError> {
        let user_json = serde_json::to_string(user).map_err(StorageError::Corrupted)?;
        self.backend.set(keys::TOKEN, token.as_str());
        match refresh_token {
            Some(rt) => self.backend.set(keys::REFRESH_TOKEN, rt.as_str()),
            None => self.backend.remove(keys::REFRESH_TOKEN),
        }
        self.backend.set(keys::USER, &user_json);
        self.backend
            .set(keys::SESSION_EXPIRY, &expires_at.get().to_string());
        self.backend
            .set(keys::REMEMBER_ME, if remember_me { "true" } else { "false" });
        self.backend
            .set(keys::LOGIN_TIME, &login_time.get().to_string());
        Ok(())
    }

    /// Persists the outcome of a successful refresh.
    ///
    /// The refresh token is only replaced when the server rotated it, and
    /// the user snapshot only when one came back with the response. The
    /// grace-window anchor moves to `refreshed_at`.
    pub fn persist_refresh(
        &self,
        token: &AccessToken,
        refresh_token: Option<&RefreshToken>,
        user: Option<&User>,
        expires_at: UnixMillis,
        refreshed_at: UnixMillis,
    ) -> Result<(), StorageError> {
        let user_json = user
            .map(serde_json::to_string)
            .transpose()
            .map_err(StorageError::Corrupted)?;
        self.backend.set(keys::TOKEN, token.as_str());
        self.backend
            .set(keys::SESSION_EXPIRY, &expires_at.get().to_string());
        if let Some(rt) = refresh_token {
            self.backend.set(keys::REFRESH_TOKEN, rt.as_str());
        }
        if let Some(json) = user_json {
            self.backend.set(keys::USER, &json);
        }
        self.backend
            .set(keys::LOGIN_TIME, &refreshed_at.get().to_string());
        Ok(())
    }

    /// Moves the sliding-window expiry. The token stands untouched, so
    /// the write-together invariant holds: both halves remain present.
    pub fn slide_expiry(&self, expires_at: UnixMillis) {
        self.backend
            .set(keys::SESSION_EXPIRY, &expires_at.get().to_string());
    }

    /// Loads whatever session state is persisted.
    ///
    /// - No token: `Ok(None)`, nothing to restore.
    /// - Token but no/corrupt user snapshot: [`StorageError`]; the caller
    ///   clears state (there is nothing to recover a session from).
    /// - Unparsable expiry or login time: surfaced as `None` fields for
    ///   the policy-level recovery path.
    pub fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        let Some(token) = self.backend.get(keys::TOKEN) else {
            return Ok(None);
        };
        let user_json = self
            .backend
            .get(keys::USER)
            .ok_or(StorageError::Incomplete("user"))?;
        let user: User =
            serde_json::from_str(&user_json).map_err(StorageError::Corrupted)?;

        let expires_at = self.parse_instant(keys::SESSION_EXPIRY);
        let login_time = self.parse_instant(keys::LOGIN_TIME);
        let remember_me = matches!(
            self.backend.get(keys::REMEMBER_ME).as_deref(),
            Some("true")
        );

        Ok(Some(PersistedSession {
            token: AccessToken(token),
            refresh_token: self.backend.get(keys::REFRESH_TOKEN).map(RefreshToken),
            user,
            expires_at,
            remember_me,
            login_time,
        }))
    }

    /// Clears every session-state key. Sentinels are left alone; clearing
    /// them would itself notify other tabs.
    pub fn clear(&self) {
        for key in keys::STATE {
            self.backend.remove(key);
        }
    }

    fn parse_instant(&self, key: &'static str) -> Option<UnixMillis> {
        let raw = self.backend.get(key)?;
        match raw.parse::<i64>() {
            Ok(millis) => Some(UnixMillis(millis)),
            Err(_) => {
                warn!(key, raw, "persisted instant unparsable");
                None
            }
        }
    }
}
