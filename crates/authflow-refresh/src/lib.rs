//! Token refresh coordination for Authflow.
//!
//! The refresh coordinator is the only code allowed to talk to the auth
//! server about token renewal. It guarantees:
//!
//! - **Single-flight**: any number of concurrent [`refresh`] callers
//!   resolve from exactly one underlying network operation.
//! - **Rate limiting**: a minimum interval between *initiated* attempts;
//!   callers arriving sooner get the current cached token back unchanged.
//! - **Endpoint fallback**: the refresh-token endpoint when one is
//!   persisted, bearer renewal otherwise.
//! - **Failure classification**: transient failures leave all state
//!   untouched; authorization failures clear it, unless the post-login
//!   grace window says to forgive exactly once.
//!
//! The server itself sits behind the [`AuthApi`] seam, so tests (and
//! alternative backends) can swap it out wholesale.
//!
//! [`refresh`]: RefreshCoordinator::refresh

#![allow(async_fn_in_trait)]

mod api;
mod coordinator;
mod error;

pub use api::{AuthApi, HttpAuthApi, HttpConfig};
pub use coordinator::{RefreshConfig, RefreshCoordinator};
pub use error::{ApiError, RefreshError};
