//! Token codec and core types for Authflow.
//!
//! This crate defines the "language" the rest of the workspace speaks:
//!
//! - **Types** ([`AccessToken`], [`User`], [`Role`], [`AuthEvent`], the
//!   server response DTOs) shared by every other crate.
//! - **Claims** ([`Claims`], [`decode`]) for structural validation and
//!   payload decoding of a signed token. Pure functions, no I/O.
//! - **Time** ([`UnixMillis`], [`Clock`]) so components that reason about
//!   expiry can be tested against an injected clock instead of the wall.
//! - **Errors** ([`TokenError`]) for everything that can go wrong while
//!   decoding.
//!
//! # Architecture
//!
//! The token layer sits below policy (expiry rules) and refresh (network
//! renewal). It knows nothing about storage or sessions; it only knows how
//! to take a token string apart and read what is inside.
//!
//! ```text
//! Refresh / Store (above)  <- decide what to do with claims
//!     |
//! Token layer (this crate) <- validates structure, decodes claims
//! ```

mod claims;
mod error;
mod types;

pub use claims::{decode, Claims};
pub use error::TokenError;
pub use types::{
    AccessToken, AuthEvent, Clock, LoginResponse, ManualClock, RefreshResponse,
    RefreshToken, Role, RoleClass, SessionCheck, SystemClock, UnixMillis, User,
    UserId,
};
