//! Integration tests for the auth state store.
//!
//! Each test wires a full store over in-memory collaborators: a scripted
//! auth server, a manual clock, the shared in-memory storage, and (for
//! multi-tab scenarios) storage-backed sync transports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use authflow::prelude::*;
use authflow_storage::{keys, StorageSync, SyncEvent};
use authflow_token::{LoginResponse, ManualClock, RefreshResponse, SessionCheck};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

// =========================================================================
// Helpers
// =========================================================================

fn token_expiring_at(exp_secs: i64) -> AccessToken {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp_secs}}}"#));
    AccessToken(format!("{header}.{payload}.sig"))
}

fn user(role: Role) -> User {
    User {
        id: UserId(1),
        username: "reader".into(),
        display_name: "Reader".into(),
        role,
    }
}

/// Scripted auth server for store-level tests.
struct MockApi {
    login_response: Mutex<Option<LoginResponse>>,
    session_checks: Mutex<VecDeque<Result<SessionCheck, ApiError>>>,
    logout_calls: AtomicUsize,
    /// Tokens are long-lived by default so the background refresh loop
    /// stays off the network unless a test scripts otherwise.
    refresh_script: Mutex<VecDeque<Result<RefreshResponse, ApiError>>>,
}

impl MockApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            login_response: Mutex::new(None),
            session_checks: Mutex::new(VecDeque::new()),
            logout_calls: AtomicUsize::new(0),
            refresh_script: Mutex::new(VecDeque::new()),
        })
    }

    fn script_login(&self, role: Role, exp_secs: i64) {
        *self.login_response.lock().unwrap() = Some(LoginResponse {
            token: token_expiring_at(exp_secs),
            refresh_token: Some(RefreshToken("long-lived".into())),
            user: user(role),
        });
    }

    fn script_session_check(&self, result: Result<SessionCheck, ApiError>) {
        self.session_checks.lock().unwrap().push_back(result);
    }
}

/// Shareable handle implementing [`AuthApi`]; the orphan rule forbids
/// implementing the foreign trait on `Arc<MockApi>` directly in this test
/// crate, so we wrap the shared handle in a local newtype.
#[derive(Clone)]
struct SharedApi(Arc<MockApi>);

impl AuthApi for SharedApi {
    async fn login(&self, _: &str, _: &str) -> Result<LoginResponse, ApiError> {
        self.0
            .login_response
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::Unauthorized(401))
    }

    async fn signup(
        &self,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<LoginResponse, ApiError> {
        self.0
            .login_response
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::Unauthorized(401))
    }

    async fn refresh_with_token(
        &self,
        _: &RefreshToken,
    ) -> Result<RefreshResponse, ApiError> {
        self.0
            .refresh_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ApiError::Timeout))
    }

    async fn refresh_with_bearer(
        &self,
        _: &AccessToken,
    ) -> Result<RefreshResponse, ApiError> {
        self.0
            .refresh_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ApiError::Timeout))
    }

    async fn logout(&self, _: &AccessToken) -> Result<(), ApiError> {
        self.0.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_session(
        &self,
        _: &AccessToken,
    ) -> Result<SessionCheck, ApiError> {
        self.0
            .session_checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SessionCheck { valid: true }))
    }
}

struct Tab {
    store: AuthStore<SharedApi>,
    api: Arc<MockApi>,
    clock: ManualClock,
    activity: Arc<ManualActivity>,
    backend: MemoryStorage,
}

/// One "tab": a full store over the given backend handle.
async fn tab(backend: MemoryStorage, clock: ManualClock) -> Tab {
    let api = MockApi::new();
    let activity = Arc::new(ManualActivity::new());
    let sync = Arc::new(StorageSync::new(
        Arc::new(backend.clone()),
        Arc::new(clock.clone()),
    ));
    let store = AuthStore::<SharedApi>::builder()
        .backend(Arc::new(backend.clone()))
        .sync(sync)
        .activity(Arc::clone(&activity) as Arc<dyn ActivitySource>)
        .clock(Arc::new(clock.clone()))
        .build(SharedApi(Arc::clone(&api)))
        .await;
    Tab {
        store,
        api,
        clock,
        activity,
        backend,
    }
}

async fn single_tab() -> Tab {
    tab(MemoryStorage::new(), ManualClock::new(UnixMillis(1_000_000_000_000))).await
}

/// Lets spawned tasks (sync pumps, reactors) run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn far_future_exp(clock: &ManualClock) -> i64 {
    clock.now().get() / 1_000 + 365 * 24 * 60 * 60
}

// =========================================================================
// Login / logout
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_login_transitions_to_authenticated() {
    let t = single_tab().await;
    t.api.script_login(Role::Member, far_future_exp(&t.clock));
    let mut events = t.store.events();

    let logged_in = t.store.login("reader", "hunter2", false).await.expect("login");

    assert_eq!(t.store.state(), AuthState::Authenticated);
    assert_eq!(t.store.current_user(), Some(logged_in.clone()));
    assert_eq!(logged_in.role, Role::Member);
    assert_eq!(events.try_recv().unwrap(), AuthEvent::Login(logged_in));
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_stays_unauthenticated() {
    let t = single_tab().await; // no scripted login response: 401

    let result = t.store.login("reader", "wrong", false).await;

    assert!(result.is_err());
    assert_eq!(t.store.state(), AuthState::Unauthenticated);
    assert!(t.store.current_user().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_logout_clears_local_state_then_notifies_server() {
    let t = single_tab().await;
    t.api.script_login(Role::Member, far_future_exp(&t.clock));
    t.store.login("reader", "hunter2", false).await.expect("login");
    let mut events = t.store.events();

    t.store.logout().await;

    assert_eq!(t.store.state(), AuthState::Unauthenticated);
    assert!(t.backend.get(keys::TOKEN).is_none(), "storage cleared");
    assert_eq!(t.api.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(events.try_recv().unwrap(), AuthEvent::Logout);
}

// =========================================================================
// Session policy scenarios
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_admin_without_remember_gets_30_minute_session() {
    let t = single_tab().await;
    t.api.script_login(Role::Admin, far_future_exp(&t.clock));

    t.store.login("admin", "hunter2", false).await.expect("login");

    let session = t.store.session().expect("session");
    assert_eq!(session.expires_at, t.clock.now() + Duration::from_secs(30 * 60));
    assert!(!session.remember_me);
}

#[tokio::test(start_paused = true)]
async fn test_member_with_remember_gets_14_day_session() {
    let t = single_tab().await;
    t.api.script_login(Role::Member, far_future_exp(&t.clock));

    t.store.login("reader", "hunter2", true).await.expect("login");

    let session = t.store.session().expect("session");
    assert_eq!(
        session.expires_at,
        t.clock.now() + Duration::from_secs(14 * 24 * 60 * 60)
    );
}

#[tokio::test(start_paused = true)]
async fn test_activity_slides_expiry_to_activity_time() {
    // Scenario: admin logs in without remember (30 minute session);
    // activity at +29 minutes pushes expiry to activity time + 30 min.
    let t = single_tab().await;
    t.api.script_login(Role::Admin, far_future_exp(&t.clock));
    t.store.login("admin", "hunter2", false).await.expect("login");

    t.clock.advance(Duration::from_secs(29 * 60));
    t.activity.record(Activity::Pointer);
    settle().await;

    let session = t.store.session().expect("session");
    assert_eq!(
        session.expires_at,
        t.clock.now() + Duration::from_secs(30 * 60),
        "expiry recomputed from the activity instant"
    );
    // The slide also reached storage (the cross-tab source of truth).
    assert_eq!(
        t.backend.get(keys::SESSION_EXPIRY).as_deref(),
        Some(session.expires_at.get().to_string().as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_activity_writes_are_throttled() {
    let t = single_tab().await;
    t.api.script_login(Role::Admin, far_future_exp(&t.clock));
    t.store.login("admin", "hunter2", false).await.expect("login");

    t.clock.advance(Duration::from_secs(60));
    t.activity.record(Activity::Pointer);
    settle().await;
    let first_slide = t.store.session().unwrap().expires_at;

    // 5 seconds later: inside the 30s throttle, the write is skipped.
    t.clock.advance(Duration::from_secs(5));
    t.activity.record(Activity::Keyboard);
    settle().await;

    assert_eq!(t.store.session().unwrap().expires_at, first_slide);
}

// =========================================================================
// Restore
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_restore_valid_persisted_session() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    {
        let first = tab(backend.new_handle(), clock.clone()).await;
        first.api.script_login(Role::Member, far_future_exp(&clock));
        first.store.login("reader", "hunter2", true).await.expect("login");
    } // first tab closes

    let second = tab(backend, clock).await;
    settle().await;

    assert_eq!(second.store.state(), AuthState::Authenticated);
    assert_eq!(second.store.current_user(), Some(user(Role::Member)));
}

#[tokio::test(start_paused = true)]
async fn test_restore_expired_session_starts_unauthenticated() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    {
        let first = tab(backend.new_handle(), clock.clone()).await;
        first.api.script_login(Role::Admin, far_future_exp(&clock));
        first.store.login("admin", "hunter2", false).await.expect("login");
    }

    // Come back well past the 30 minute session and the grace window.
    clock.advance(Duration::from_secs(2 * 60 * 60));
    let second = tab(backend.clone(), clock).await;

    assert_eq!(second.store.state(), AuthState::Unauthenticated);
    assert!(backend.get(keys::TOKEN).is_none(), "stale state cleared");
}

#[tokio::test(start_paused = true)]
async fn test_restore_just_logged_in_survives_grace_race() {
    // An admin session persisted with an already-stale expiry, but the
    // login happened seconds ago: the grace window lets it stand
    // (covers the page-reload-right-after-login race with clock skew).
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    let store = SessionStore::new(Arc::new(backend.new_handle()));
    let now = clock.now();
    store
        .persist_login(
            &token_expiring_at(far_future_exp(&clock)),
            None,
            &user(Role::Admin),
            now, // expiry == now: already invalid without grace
            false,
            now,
        )
        .expect("seed");

    let t = tab(backend, clock).await;

    assert_eq!(t.store.state(), AuthState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_restore_recovers_unparsable_expiry_once() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    {
        let first = tab(backend.new_handle(), clock.clone()).await;
        first.api.script_login(Role::Member, far_future_exp(&clock));
        first.store.login("reader", "hunter2", true).await.expect("login");
    }
    backend.set(keys::SESSION_EXPIRY, "not-a-number");

    let t = tab(backend.clone(), clock.clone()).await;

    // Recovery recomputed a default (short) expiry from the snapshot.
    assert_eq!(t.store.state(), AuthState::Authenticated);
    let session = t.store.session().expect("recovered session");
    assert_eq!(
        session.expires_at,
        clock.now() + Duration::from_secs(3 * 60 * 60),
        "recovered expiry uses the short standard timeout"
    );
    let persisted: i64 = backend
        .get(keys::SESSION_EXPIRY)
        .expect("rewritten")
        .parse()
        .expect("numeric again");
    assert_eq!(persisted, session.expires_at.get());
}

#[tokio::test(start_paused = true)]
async fn test_restore_corrupt_user_clears_state() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    backend.set(keys::TOKEN, "a.b.c");
    backend.set(keys::USER, "{corrupt json");

    let t = tab(backend.clone(), clock).await;

    assert_eq!(t.store.state(), AuthState::Unauthenticated);
    assert!(backend.get(keys::TOKEN).is_none(), "corrupt state cleared");
}

#[tokio::test(start_paused = true)]
async fn test_restore_server_rejection_outside_grace_signs_out() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    {
        let first = tab(backend.new_handle(), clock.clone()).await;
        first.api.script_login(Role::Member, far_future_exp(&clock));
        first.store.login("reader", "hunter2", true).await.expect("login");
    }
    // Long past the grace window, with the session itself still valid.
    clock.advance(Duration::from_secs(60 * 60));

    let api = MockApi::new();
    api.script_session_check(Ok(SessionCheck { valid: false }));
    let sync = Arc::new(StorageSync::new(
        Arc::new(backend.clone()),
        Arc::new(clock.clone()),
    ));
    let store = AuthStore::<SharedApi>::builder()
        .backend(Arc::new(backend.clone()))
        .sync(sync)
        .clock(Arc::new(clock.clone()))
        .build(SharedApi(Arc::clone(&api)))
        .await;
    assert_eq!(store.state(), AuthState::Authenticated, "local restore stood");

    settle().await; // confirmation + reactor run

    assert_eq!(store.state(), AuthState::Unauthenticated);
    assert!(backend.get(keys::TOKEN).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restore_server_rejection_inside_grace_is_ignored() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    {
        let first = tab(backend.new_handle(), clock.clone()).await;
        first.api.script_login(Role::Member, far_future_exp(&clock));
        first.store.login("reader", "hunter2", true).await.expect("login");
    }

    // Reload immediately after login; the server lags behind.
    let api = MockApi::new();
    api.script_session_check(Ok(SessionCheck { valid: false }));
    let store = AuthStore::<SharedApi>::builder()
        .backend(Arc::new(backend.clone()))
        .clock(Arc::new(clock.clone()))
        .build(SharedApi(Arc::clone(&api)))
        .await;
    settle().await;

    assert_eq!(store.state(), AuthState::Authenticated, "grace window holds");
}

// =========================================================================
// Validity sweep
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_signs_out_expired_session() {
    let t = single_tab().await;
    t.api.script_login(Role::Admin, far_future_exp(&t.clock));
    t.store.login("admin", "hunter2", false).await.expect("login");
    let mut events = t.store.events();

    // Step the wall clock past the 30 minute session and the grace
    // window, then let the 60s sweep timer fire.
    t.clock.advance(Duration::from_secs(36 * 60));
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(t.store.state(), AuthState::Unauthenticated);
    assert!(t.backend.get(keys::TOKEN).is_none());
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&AuthEvent::TokenInvalid), "notice surfaced");
    assert!(seen.contains(&AuthEvent::Logout));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_valid_session() {
    let t = single_tab().await;
    t.api.script_login(Role::Member, far_future_exp(&t.clock));
    t.store.login("reader", "hunter2", true).await.expect("login");

    t.clock.advance(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(t.store.state(), AuthState::Authenticated);
}

// =========================================================================
// Cross-tab scenarios
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_login_broadcast_authenticates_other_tab() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    let tab_a = tab(backend.new_handle(), clock.clone()).await;
    let tab_b = tab(backend, clock).await;
    assert_eq!(tab_b.store.state(), AuthState::Unauthenticated);

    tab_a.api.script_login(Role::Member, far_future_exp(&tab_a.clock));
    tab_a.store.login("reader", "hunter2", true).await.expect("login");
    settle().await;

    assert_eq!(tab_b.store.state(), AuthState::Authenticated);
    assert_eq!(tab_b.store.current_user(), Some(user(Role::Member)));
    // Tab B picked the persisted expiry up rather than recomputing it.
    assert_eq!(
        tab_b.store.session().unwrap().expires_at,
        tab_a.store.session().unwrap().expires_at
    );
}

#[tokio::test(start_paused = true)]
async fn test_logout_broadcast_reaches_other_tab_without_echo() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    let tab_a = tab(backend.new_handle(), clock.clone()).await;
    let tab_b = tab(backend.new_handle(), clock.clone()).await;

    tab_a.api.script_login(Role::Member, far_future_exp(&tab_a.clock));
    tab_a.store.login("reader", "hunter2", true).await.expect("login");
    settle().await;
    assert_eq!(tab_b.store.state(), AuthState::Authenticated);

    // A third observer counts Logout broadcasts on the wire; if tab B
    // re-broadcast what it received, the count would exceed one.
    let observer = StorageSync::new(Arc::new(backend), Arc::new(clock.clone()));
    let mut observed = observer.subscribe();

    tab_a.store.logout().await;
    settle().await;

    assert_eq!(tab_b.store.state(), AuthState::Unauthenticated);
    let mut logout_broadcasts = 0;
    while let Ok(event) = observed.try_recv() {
        if event == SyncEvent::Logout {
            logout_broadcasts += 1;
        }
    }
    assert_eq!(logout_broadcasts, 1, "receiving tab must not re-broadcast");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_login_broadcast_is_idempotent() {
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    let tab_b = tab(backend.new_handle(), clock.clone()).await;

    // A raw transport standing in for tab A.
    let remote = StorageSync::new(Arc::new(backend), Arc::new(clock.clone()));
    let seed_store = SessionStore::new(Arc::new(tab_b.backend.clone()));
    let now = clock.now();
    seed_store
        .persist_login(
            &token_expiring_at(far_future_exp(&clock)),
            None,
            &user(Role::Member),
            now + Duration::from_secs(3 * 60 * 60),
            false,
            now,
        )
        .expect("seed shared storage");

    remote.publish(&SyncEvent::Login(user(Role::Member)));
    settle().await;
    let state_after_first = (
        tab_b.store.state(),
        tab_b.store.current_user(),
        tab_b.store.session(),
    );

    remote.publish(&SyncEvent::Login(user(Role::Member)));
    settle().await;

    assert_eq!(
        (
            tab_b.store.state(),
            tab_b.store.current_user(),
            tab_b.store.session()
        ),
        state_after_first,
        "applying the same broadcast twice changes nothing"
    );
}

#[tokio::test(start_paused = true)]
async fn test_logout_broadcast_tolerated_before_restore_finished() {
    // A tab with nothing persisted (it "never finished restoring" a
    // session) receives a Logout broadcast: no panic, state stays
    // unauthenticated, nothing is re-broadcast.
    let backend = MemoryStorage::new();
    let clock = ManualClock::new(UnixMillis(1_000_000_000_000));
    let t = tab(backend.new_handle(), clock.clone()).await;
    assert_eq!(t.store.state(), AuthState::Unauthenticated);

    let remote = StorageSync::new(Arc::new(backend), Arc::new(clock.clone()));
    remote.publish(&SyncEvent::Logout);
    settle().await;

    assert_eq!(t.store.state(), AuthState::Unauthenticated);
}
