//! # Authflow
//!
//! Client-side session and token lifecycle manager.
//!
//! Authflow keeps an application's authentication state correct under
//! concurrent refresh attempts, multi-tab usage, clock skew, transient
//! network failures, and a long-lived push-event connection. The facade
//! crate composes the layers into one observable [`AuthStore`]:
//!
//! ```text
//! AuthStore (this crate)    <- state machine, sweeps, activity, sign-out
//!     |- authflow-refresh   <- single-flight token renewal
//!     |- authflow-storage   <- persisted state + cross-tab sync
//!     |- authflow-policy    <- timeout table, grace windows
//!     |- authflow-token     <- claims decoding, shared types
//! authflow-stream           <- push events, consumed independently
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use authflow::prelude::*;
//!
//! # async fn run() -> Result<(), authflow::AuthflowError> {
//! let api = HttpAuthApi::new(HttpConfig::new("https://api.example.com"))?;
//! let store = AuthStore::<HttpAuthApi>::builder().build(api).await;
//!
//! let user = store.login("reader@example.com", "hunter2", true).await?;
//! tracing::info!(%user.id, "signed in");
//! # Ok(())
//! # }
//! ```

mod activity;
mod error;
mod store;

pub use activity::{Activity, ActivitySource, ManualActivity};
pub use error::AuthflowError;
pub use store::{AuthConfig, AuthState, AuthStore, AuthStoreBuilder};

/// The common import surface.
pub mod prelude {
    pub use crate::{
        Activity, ActivitySource, AuthConfig, AuthState, AuthStore,
        AuthStoreBuilder, AuthflowError, ManualActivity,
    };
    pub use authflow_policy::{PolicyConfig, Session, SessionPolicy};
    pub use authflow_refresh::{
        ApiError, AuthApi, HttpAuthApi, HttpConfig, RefreshConfig,
        RefreshCoordinator,
    };
    pub use authflow_storage::{
        LocalBus, MemoryStorage, SessionStore, StorageBackend, StorageSync,
        SyncTransport,
    };
    pub use authflow_stream::{EventStreamClient, StreamConfig};
    pub use authflow_token::{
        AccessToken, AuthEvent, Clock, RefreshToken, Role, SystemClock,
        UnixMillis, User, UserId,
    };
}
