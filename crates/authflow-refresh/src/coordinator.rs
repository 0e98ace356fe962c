//! The refresh coordinator: single-flight, rate-limited token renewal.

use std::sync::Arc;
use std::time::Duration;

use authflow_policy::SessionPolicy;
use authflow_storage::{PersistedSession, SessionStore};
use authflow_token::{AccessToken, AuthEvent, Clock, UnixMillis};
use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{AuthApi, RefreshError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the refresh coordinator.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Minimum gap between *initiated* network refresh attempts. A call
    /// arriving sooner, with nothing in flight, returns the cached token.
    pub min_attempt_interval: Duration,
    /// Refresh when the token expires within this window.
    pub refresh_threshold: Duration,
    /// Period of the background check loop. 8 minutes, deliberately
    /// off-cycle from other periodic app polling.
    pub auto_period: Duration,
    /// Delay before the first background check after startup.
    pub initial_delay: Duration,
    /// Random jitter (0..max) added to the initial check so a fleet of
    /// freshly opened tabs doesn't hit the server in lockstep.
    pub initial_jitter: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_attempt_interval: Duration::from_secs(30),
            refresh_threshold: Duration::from_secs(10 * 60),
            auto_period: Duration::from_secs(8 * 60),
            initial_delay: Duration::from_secs(30),
            initial_jitter: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Book-keeping shared by all refresh callers.
///
/// The generation counter is the single-flight mechanism: it is bumped
/// once per completed network attempt, while the attempt runs under the
/// [`Mutex`]. A caller that observed generation `g` and finds `g` changed
/// after acquiring the lock knows somebody else just finished the work.
struct FlightState {
    generation: u64,
    last_attempt: Option<UnixMillis>,
    /// Whether the one free pass of the current grace window is spent.
    grace_forgiven: bool,
}

/// Single-flight, rate-limited token renewal against the auth server.
///
/// One instance per process, shared behind an [`Arc`]. All state is in
/// private fields so tests can build isolated instances; nothing is
/// process-global.
pub struct RefreshCoordinator<A: AuthApi> {
    api: A,
    store: SessionStore,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    events: broadcast::Sender<AuthEvent>,
    flight: Mutex<FlightState>,
}

impl<A: AuthApi> RefreshCoordinator<A> {
    pub fn new(
        api: A,
        store: SessionStore,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
        events: broadcast::Sender<AuthEvent>,
    ) -> Self {
        Self {
            api,
            store,
            policy,
            clock,
            config,
            events,
            flight: Mutex::new(FlightState {
                generation: 0,
                last_attempt: None,
                grace_forgiven: false,
            }),
        }
    }

    /// Direct access to the API seam (login, signup, logout pass through
    /// the same implementation the coordinator refreshes against).
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Resets flight book-keeping after a fresh authentication: a clean
    /// rate-limit window and an unspent grace forgiveness.
    pub async fn note_authenticated(&self) {
        let mut flight = self.flight.lock().await;
        flight.last_attempt = None;
        flight.grace_forgiven = false;
    }

    /// Renews the access token, coalescing concurrent callers.
    ///
    /// Exactly one network operation runs per overlapping window of
    /// callers; the rest resolve from its persisted outcome. Independent
    /// of in-flight coalescing, attempts initiated within
    /// `min_attempt_interval` of the previous one short-circuit to the
    /// cached token.
    ///
    /// Returns `Ok(None)` when there is no session to refresh.
    pub async fn refresh(&self) -> Result<Option<AccessToken>, RefreshError> {
        let observed = self.flight.lock().await.generation;
        let mut flight = self.flight.lock().await;
        if flight.generation != observed {
            // Somebody else completed a refresh while we waited for the
            // lock; its outcome is already persisted.
            debug!("refresh coalesced onto a just-finished attempt");
            return Ok(self.load_state()?.map(|p| p.token));
        }

        let now = self.clock.now();
        if let Some(last) = flight.last_attempt {
            if now.saturating_since(last) < self.config.min_attempt_interval {
                debug!("refresh rate-limited, returning cached token");
                return Ok(self.load_state()?.map(|p| p.token));
            }
        }

        let Some(persisted) = self.load_state()? else {
            return Ok(None);
        };
        flight.last_attempt = Some(now);

        // The network call runs while the lock is held; that is what
        // parks concurrent callers until the outcome is known.
        let result = match &persisted.refresh_token {
            Some(refresh_token) => self.api.refresh_with_token(refresh_token).await,
            None => self.api.refresh_with_bearer(&persisted.token).await,
        };
        flight.generation = flight.generation.wrapping_add(1);

        match result {
            Ok(response) => {
                let now = self.clock.now();
                let role = response
                    .user
                    .as_ref()
                    .map(|u| u.role)
                    .unwrap_or(persisted.user.role);
                let expires_at =
                    self.policy
                        .compute_expiry(role, persisted.remember_me, now);
                self.store.persist_refresh(
                    &response.token,
                    response.refresh_token.as_ref(),
                    response.user.as_ref(),
                    expires_at,
                    now,
                )?;
                flight.grace_forgiven = false;
                info!("access token refreshed");
                let _ = self.events.send(AuthEvent::TokenRefreshed {
                    token: response.token.clone(),
                    user: response.user,
                });
                Ok(Some(response.token))
            }
            Err(error) if error.is_unauthorized() => {
                let in_grace = self
                    .policy
                    .in_grace_window(persisted.login_time, self.clock.now());
                if in_grace && !flight.grace_forgiven {
                    flight.grace_forgiven = true;
                    warn!(
                        %error,
                        "authorization failure inside grace window, forgiving once"
                    );
                    let _ = self.events.send(AuthEvent::RefreshFailed);
                    Ok(Some(persisted.token))
                } else {
                    warn!(%error, "authorization failure, clearing session state");
                    self.store.clear();
                    let _ = self.events.send(AuthEvent::TokenInvalid);
                    Err(error.into())
                }
            }
            Err(error) => {
                debug!(%error, "transient refresh failure, state preserved");
                let _ = self.events.send(AuthEvent::RefreshFailed);
                Err(error.into())
            }
        }
    }

    /// Returns a token that is good for at least the refresh threshold,
    /// refreshing if needed.
    ///
    /// A transient refresh failure falls back to the stale token (the
    /// next scheduled check retries); fatal failures propagate after
    /// state has been cleared.
    pub async fn ensure_valid_token(
        &self,
    ) -> Result<Option<AccessToken>, RefreshError> {
        let Some(persisted) = self.load_state()? else {
            return Ok(None);
        };
        let now = self.clock.now();

        let claims = match authflow_token::decode(persisted.token.as_str()) {
            Ok(claims) => claims,
            Err(error) => {
                if self.policy.in_grace_window(persisted.login_time, now) {
                    warn!(
                        %error,
                        "token structurally invalid inside grace window, keeping state"
                    );
                    return Ok(Some(persisted.token));
                }
                warn!(%error, "token structurally invalid, clearing session state");
                self.store.clear();
                let _ = self.events.send(AuthEvent::TokenInvalid);
                return Err(error.into());
            }
        };

        if !claims.is_expired(self.config.refresh_threshold, now) {
            return Ok(Some(persisted.token));
        }

        match self.refresh().await {
            Ok(token) => Ok(token),
            Err(error) if error.is_transient() => {
                debug!(%error, "refresh failed transiently, keeping stale token");
                Ok(Some(persisted.token))
            }
            Err(error) => Err(error),
        }
    }

    /// Spawns the background check loop: one delayed initial check, then
    /// a fixed period. The caller owns the handle and aborts it on
    /// sign-out.
    pub fn spawn_auto_refresh(self: Arc<Self>) -> JoinHandle<()> {
        let coordinator = self;
        tokio::spawn(async move {
            let mut delay = coordinator.config.initial_delay;
            if coordinator.config.initial_jitter > Duration::ZERO {
                let max_ms = coordinator.config.initial_jitter.as_millis() as u64;
                let jitter_ms = rand::rng().random_range(0..max_ms);
                delay += Duration::from_millis(jitter_ms);
            }
            debug!(delay_secs = delay.as_secs(), "auto-refresh loop starting");
            tokio::time::sleep(delay).await;
            coordinator.scheduled_check().await;
            loop {
                tokio::time::sleep(coordinator.config.auto_period).await;
                coordinator.scheduled_check().await;
            }
        })
    }

    async fn scheduled_check(&self) {
        match self.ensure_valid_token().await {
            Ok(_) => {}
            Err(error) if error.is_transient() => {
                debug!(%error, "scheduled token check failed transiently")
            }
            Err(error) => warn!(%error, "scheduled token check failed"),
        }
    }

    /// Loads persisted state, converging unreadable state onto the
    /// cleared-and-notified path.
    fn load_state(&self) -> Result<Option<PersistedSession>, RefreshError> {
        match self.store.load() {
            Ok(state) => Ok(state),
            Err(error) => {
                warn!(%error, "persisted session unreadable, clearing");
                self.store.clear();
                let _ = self.events.send(AuthEvent::TokenInvalid);
                Err(error.into())
            }
        }
    }
}
