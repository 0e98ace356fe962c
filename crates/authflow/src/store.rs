//! The auth state store: the orchestrator over every other layer.
//!
//! One `AuthStore` per process. On construction it restores whatever
//! session the storage holds, then keeps the state machine honest with a
//! periodic validity sweep, activity-driven sliding expiry, the refresh
//! coordinator's background loop, and the cross-tab sync listener.
//!
//! ```text
//!   Unauthenticated --login/signup ok--> Authenticated
//!   Restoring --valid persisted session--> Authenticated
//!   Restoring --invalid or corrupt--> Unauthenticated
//!   Authenticated --activity--> Authenticated (expiry slides forward)
//!   Authenticated --sweep fails / fatal refresh--> Unauthenticated
//! ```
//!
//! There is no terminal state; a store that signed out can log back in.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use authflow_policy::{PolicyConfig, Session, SessionPolicy};
use authflow_refresh::{AuthApi, RefreshConfig, RefreshCoordinator};
use authflow_storage::{
    LocalBus, MemoryStorage, SessionStore, StorageBackend, SyncEvent,
    SyncTransport,
};
use authflow_token::{
    AccessToken, AuthEvent, Clock, SessionCheck, SystemClock, UnixMillis, User,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ActivitySource, AuthflowError, ManualActivity};

/// Capacity of the emitted-events channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the auth store and the layers it wires together.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub policy: PolicyConfig,
    pub refresh: RefreshConfig,
    /// Period of the local validity sweep.
    pub sweep_period: Duration,
    /// Minimum gap between sliding-expiry storage writes; pointer-move
    /// storms are collapsed to one write per window.
    pub activity_throttle: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            refresh: RefreshConfig::default(),
            sweep_period: Duration::from_secs(60),
            activity_throttle: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// The observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No session. The starting state after a failed restore or any
    /// sign-out.
    Unauthenticated,
    /// Construction is still deciding whether persisted state holds a
    /// usable session.
    Restoring,
    /// A user is signed in and the session is considered valid.
    Authenticated,
}

struct StoreState {
    auth_state: AuthState,
    user: Option<User>,
    session: Option<Session>,
    /// Instant of the last persisted expiry slide, for throttling.
    last_slide: Option<UnixMillis>,
}

/// The background tasks that only run while a session exists. Canceled
/// by the sign-out routine, re-registered on login.
#[derive(Default)]
struct Timers {
    auto_refresh: Option<JoinHandle<()>>,
    sweep: Option<JoinHandle<()>>,
    activity: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel(&mut self) {
        for handle in [
            self.auto_refresh.take(),
            self.sweep.take(),
            self.activity.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct StoreInner<A: AuthApi> {
    coordinator: Arc<RefreshCoordinator<A>>,
    session_store: SessionStore,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    sync: Arc<dyn SyncTransport>,
    activity: Arc<dyn ActivitySource>,
    events: broadcast::Sender<AuthEvent>,
    config: AuthConfig,
    state: Mutex<StoreState>,
    timers: Mutex<Timers>,
    /// Long-lived service tasks (sync listener, event reactor). These
    /// survive sign-out: a signed-out tab still reacts to another tab's
    /// login broadcast.
    services: Mutex<Vec<JoinHandle<()>>>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and constructing an [`AuthStore`].
///
/// Every collaborator is injectable; the defaults give an isolated
/// in-process store suitable for tests and single-tab deployments.
pub struct AuthStoreBuilder {
    backend: Option<Arc<dyn StorageBackend>>,
    sync: Option<Arc<dyn SyncTransport>>,
    activity: Option<Arc<dyn ActivitySource>>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthStoreBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            sync: None,
            activity: None,
            clock: Arc::new(SystemClock),
            config: AuthConfig::default(),
        }
    }

    /// The shared storage backend (one handle per tab).
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The cross-tab sync transport. Pair a `StorageSync` with the same
    /// backend handle for real multi-tab propagation.
    pub fn sync(mut self, sync: Arc<dyn SyncTransport>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// The user-activity capability driving the sliding window.
    pub fn activity(mut self, activity: Arc<dyn ActivitySource>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the store and restores any persisted session.
    ///
    /// Must run inside a tokio runtime; this spawns the background
    /// machinery.
    pub async fn build<A: AuthApi>(self, api: A) -> AuthStore<A> {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let sync = self.sync.unwrap_or_else(|| Arc::new(LocalBus::new()));
        let activity = self
            .activity
            .unwrap_or_else(|| Arc::new(ManualActivity::new()));
        let session_store = SessionStore::new(backend);
        let policy = SessionPolicy::new(self.config.policy.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let coordinator = Arc::new(RefreshCoordinator::new(
            api,
            session_store.clone(),
            policy.clone(),
            Arc::clone(&self.clock),
            self.config.refresh.clone(),
            events.clone(),
        ));

        let inner = Arc::new(StoreInner {
            coordinator,
            session_store,
            policy,
            clock: self.clock,
            sync,
            activity,
            events,
            config: self.config,
            state: Mutex::new(StoreState {
                auth_state: AuthState::Restoring,
                user: None,
                session: None,
                last_slide: None,
            }),
            timers: Mutex::new(Timers::default()),
            services: Mutex::new(Vec::new()),
        });

        let restored_token = StoreInner::restore(&inner);
        StoreInner::spawn_services(&inner);
        if let Some(token) = restored_token {
            StoreInner::spawn_restore_confirmation(&inner, token);
        }

        AuthStore { inner }
    }
}

impl Default for AuthStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// AuthStore
// ---------------------------------------------------------------------------

/// The composed, observable authentication state of this process.
pub struct AuthStore<A: AuthApi> {
    inner: Arc<StoreInner<A>>,
}

impl<A: AuthApi> AuthStore<A> {
    /// Creates a builder.
    pub fn builder() -> AuthStoreBuilder {
        AuthStoreBuilder::new()
    }

    /// The current state machine position.
    pub fn state(&self) -> AuthState {
        self.inner.lock_state().auth_state
    }

    /// The signed-in user snapshot, if any.
    pub fn current_user(&self) -> Option<User> {
        self.inner.lock_state().user.clone()
    }

    /// The derived session record, if any.
    pub fn session(&self) -> Option<Session> {
        self.inner.lock_state().session
    }

    /// Subscribes to emitted [`AuthEvent`]s.
    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// The refresh coordinator, for callers that attach tokens to their
    /// own requests.
    pub fn refresh_coordinator(&self) -> Arc<RefreshCoordinator<A>> {
        Arc::clone(&self.inner.coordinator)
    }

    /// See [`RefreshCoordinator::ensure_valid_token`].
    pub async fn ensure_valid_token(
        &self,
    ) -> Result<Option<AccessToken>, AuthflowError> {
        Ok(self.inner.coordinator.ensure_valid_token().await?)
    }

    /// Exchanges credentials for a session.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<User, AuthflowError> {
        let response = self.inner.coordinator.api().login(identifier, password).await?;
        StoreInner::complete_authentication(&self.inner, response, remember_me).await
    }

    /// Registers an account; on success the session starts immediately,
    /// same sequence as login.
    pub async fn signup(
        &self,
        identifier: &str,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<User, AuthflowError> {
        let response = self
            .inner
            .coordinator
            .api()
            .signup(identifier, username, password)
            .await?;
        StoreInner::complete_authentication(&self.inner, response, remember_me).await
    }

    /// Signs out. Fail-closed: local state is cleared and broadcast
    /// before the best-effort server notification, whose failure is
    /// ignored.
    pub async fn logout(&self) {
        let token = self
            .inner
            .session_store
            .load()
            .ok()
            .flatten()
            .map(|persisted| persisted.token);
        self.inner.sign_out(true);
        if let Some(token) = token {
            if let Err(error) = self.inner.coordinator.api().logout(&token).await {
                debug!(%error, "server logout failed; local state already cleared");
            }
        }
    }
}

impl<A: AuthApi> Drop for AuthStore<A> {
    fn drop(&mut self) {
        self.inner.lock_timers().cancel();
        for handle in self.inner.lock_services().drain(..) {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Inner machinery
// ---------------------------------------------------------------------------

impl<A: AuthApi> StoreInner<A> {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_services(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attempts restoration from persisted state. Returns the restored
    /// token when the session stands, for the async server confirmation.
    fn restore(inner: &Arc<Self>) -> Option<AccessToken> {
        let now = inner.clock.now();
        let persisted = match inner.session_store.load() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                debug!("no persisted session to restore");
                inner.lock_state().auth_state = AuthState::Unauthenticated;
                return None;
            }
            Err(error) => {
                warn!(%error, "persisted session unreadable, clearing");
                inner.session_store.clear();
                inner.lock_state().auth_state = AuthState::Unauthenticated;
                return None;
            }
        };

        // Rebuild the session record; an unparsable expiry gets one
        // recovery attempt with recomputed defaults.
        let session = match persisted.expires_at {
            Some(expires_at) => Session {
                expires_at,
                remember_me: persisted.remember_me,
                role_class: persisted.user.role.class(),
            },
            None => {
                let session = Session::recovered(&persisted.user, now, &inner.policy);
                inner.session_store.slide_expiry(session.expires_at);
                session
            }
        };

        // The "just logged in" grace window lets a slightly-stale-looking
        // session stand across the page-reload-right-after-login race.
        let grace = if inner.policy.in_grace_window(persisted.login_time, now) {
            inner.policy.grace_window()
        } else {
            Duration::ZERO
        };
        if !inner.policy.is_valid(session.expires_at, grace, now) {
            info!("persisted session expired, starting unauthenticated");
            inner.session_store.clear();
            inner.lock_state().auth_state = AuthState::Unauthenticated;
            return None;
        }

        {
            let mut state = inner.lock_state();
            state.auth_state = AuthState::Authenticated;
            state.user = Some(persisted.user.clone());
            state.session = Some(session);
        }
        Self::start_timers(inner);
        info!(user = %persisted.user.id, "session restored");
        Some(persisted.token)
    }

    /// Spawns the long-lived services: cross-tab sync listener and the
    /// event reactor that converges fatal failures onto sign-out.
    fn spawn_services(inner: &Arc<Self>) {
        let sync_inner = Arc::clone(inner);
        let sync_task = tokio::spawn(async move {
            let mut rx = sync_inner.sync.subscribe();
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::Login(user)) => {
                        Self::apply_remote_login(&sync_inner, user)
                    }
                    Ok(SyncEvent::Logout) => sync_inner.apply_remote_logout(),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let reactor_inner = Arc::clone(inner);
        let reactor_task = tokio::spawn(async move {
            let mut rx = reactor_inner.events.subscribe();
            loop {
                match rx.recv().await {
                    // Every fatal path emits TokenInvalid; the reactor is
                    // the single place that turns it into a sign-out.
                    Ok(AuthEvent::TokenInvalid) => reactor_inner.sign_out(true),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut services = inner.lock_services();
        services.push(sync_task);
        services.push(reactor_task);
    }

    /// Best-effort server confirmation of a restored session. Transient
    /// failures are ignored; a rejection outside the grace window emits
    /// `TokenInvalid` for the reactor to act on.
    fn spawn_restore_confirmation(inner: &Arc<Self>, token: AccessToken) {
        let confirm_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            match confirm_inner.coordinator.api().check_session(&token).await {
                Ok(SessionCheck { valid: true }) => {
                    debug!("restored session confirmed by server");
                }
                Ok(SessionCheck { valid: false }) => {
                    confirm_inner.server_rejected_session();
                }
                Err(error) if error.is_unauthorized() => {
                    confirm_inner.server_rejected_session();
                }
                Err(error) => {
                    debug!(%error, "session check failed transiently, ignoring");
                }
            }
        });
        inner.lock_services().push(task);
    }

    fn server_rejected_session(&self) {
        let now = self.clock.now();
        let login_time = self
            .session_store
            .load()
            .ok()
            .flatten()
            .and_then(|persisted| persisted.login_time);
        if self.policy.in_grace_window(login_time, now) {
            warn!("server rejected restored session inside grace window, ignoring");
            return;
        }
        warn!("server rejected restored session, signing out");
        let _ = self.events.send(AuthEvent::TokenInvalid);
    }

    /// The one sequence shared by login and signup.
    async fn complete_authentication(
        inner: &Arc<Self>,
        response: authflow_token::LoginResponse,
        remember_me: bool,
    ) -> Result<User, AuthflowError> {
        let now = inner.clock.now();
        let session =
            Session::compute(response.user.role, remember_me, now, &inner.policy);
        inner.session_store.persist_login(
            &response.token,
            response.refresh_token.as_ref(),
            &response.user,
            session.expires_at,
            remember_me,
            now,
        )?;
        {
            let mut state = inner.lock_state();
            state.auth_state = AuthState::Authenticated;
            state.user = Some(response.user.clone());
            state.session = Some(session);
            state.last_slide = None;
        }
        inner.coordinator.note_authenticated().await;
        Self::start_timers(inner);
        inner.sync.publish(&SyncEvent::Login(response.user.clone()));
        let _ = inner.events.send(AuthEvent::Login(response.user.clone()));
        info!(user = %response.user.id, "signed in");
        Ok(response.user)
    }

    /// The converged sign-out routine. Fail-closed ordering: state and
    /// storage go first, then timers, then the outward notifications.
    /// `propagate` is false when this sign-out was itself triggered by a
    /// received broadcast, which is what stops broadcast storms.
    fn sign_out(&self, propagate: bool) {
        let was_authenticated = {
            let mut state = self.lock_state();
            let was = state.auth_state == AuthState::Authenticated;
            state.auth_state = AuthState::Unauthenticated;
            state.user = None;
            state.session = None;
            state.last_slide = None;
            was
        };
        self.session_store.clear();
        self.lock_timers().cancel();
        let _ = self.events.send(AuthEvent::Logout);
        if propagate {
            self.sync.publish(&SyncEvent::Logout);
        }
        if was_authenticated {
            info!("signed out");
        }
    }

    /// Applies a Login broadcast from another tab. Idempotent, and never
    /// re-broadcasts: the originating tab already persisted everything,
    /// this tab only catches its in-memory state up.
    fn apply_remote_login(inner: &Arc<Self>, user: User) {
        let now = inner.clock.now();
        let persisted = inner.session_store.load().ok().flatten();
        let remember_me = persisted
            .as_ref()
            .map(|p| p.remember_me)
            .unwrap_or(false);
        let session = match persisted.as_ref().and_then(|p| p.expires_at) {
            Some(expires_at) => Session {
                expires_at,
                remember_me,
                role_class: user.role.class(),
            },
            None => Session::compute(user.role, remember_me, now, &inner.policy),
        };
        {
            let mut state = inner.lock_state();
            state.auth_state = AuthState::Authenticated;
            state.user = Some(user.clone());
            state.session = Some(session);
        }
        Self::start_timers(inner);
        let _ = inner.events.send(AuthEvent::Login(user));
        debug!("applied login broadcast from another tab");
    }

    /// Applies a Logout broadcast from another tab. Safe even when this
    /// tab never finished restoring; sign-out from `Restoring` or
    /// `Unauthenticated` is a no-op on top of a no-op.
    fn apply_remote_logout(&self) {
        debug!("applying logout broadcast from another tab");
        self.sign_out(false);
    }

    /// Spawns the session-scoped background tasks, replacing any
    /// previous set.
    fn start_timers(inner: &Arc<Self>) {
        let mut timers = inner.lock_timers();
        timers.cancel();

        timers.auto_refresh =
            Some(Arc::clone(&inner.coordinator).spawn_auto_refresh());

        let sweep_inner = Arc::clone(inner);
        timers.sweep = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep_inner.config.sweep_period).await;
                sweep_inner.sweep_once();
            }
        }));

        let activity_inner = Arc::clone(inner);
        timers.activity = Some(tokio::spawn(async move {
            let mut rx = activity_inner.activity.watch();
            loop {
                match rx.recv().await {
                    Ok(_) => activity_inner.note_activity(),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// One periodic validity check against the persisted expiry (the
    /// cross-tab source of truth; another tab may have slid it forward).
    fn sweep_once(&self) {
        if self.lock_state().auth_state != AuthState::Authenticated {
            return;
        }
        let persisted = match self.session_store.load() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                // Storage is gone but we think we are signed in; treat it
                // as an expired session.
                warn!("persisted session vanished, signing out");
                let _ = self.events.send(AuthEvent::TokenInvalid);
                return;
            }
            Err(error) => {
                warn!(%error, "persisted session unreadable during sweep");
                let _ = self.events.send(AuthEvent::TokenInvalid);
                return;
            }
        };

        let now = self.clock.now();
        let expires_at = match persisted.expires_at {
            Some(expires_at) => {
                // Catch the in-memory record up with other tabs' slides.
                let mut state = self.lock_state();
                if let Some(session) = &mut state.session {
                    session.expires_at = expires_at;
                }
                expires_at
            }
            None => match &self.lock_state().session {
                Some(session) => session.expires_at,
                None => return,
            },
        };

        let grace = if self.policy.in_grace_window(persisted.login_time, now) {
            self.policy.grace_window()
        } else {
            Duration::ZERO
        };
        if !self.policy.is_valid(expires_at, grace, now) {
            warn!("session expired, signing out");
            let _ = self.events.send(AuthEvent::TokenInvalid);
        }
    }

    /// Slides the session window on observed activity, at most once per
    /// throttle interval.
    fn note_activity(&self) {
        let now = self.clock.now();
        let expires_at = {
            let mut state = self.lock_state();
            if state.auth_state != AuthState::Authenticated {
                return;
            }
            if let Some(last) = state.last_slide {
                if now.saturating_since(last) < self.config.activity_throttle {
                    return;
                }
            }
            let Some(session) = &mut state.session else {
                return;
            };
            session.slide(now, &self.policy);
            let expires_at = session.expires_at;
            state.last_slide = Some(now);
            expires_at
        };
        self.session_store.slide_expiry(expires_at);
        debug!(expires_at = %expires_at, "session window extended on activity");
    }
}
