//! Session policy for Authflow.
//!
//! This crate answers two questions, and only these two:
//!
//! 1. **How long should a session last?** Computed from the user's
//!    privilege class and their remember-me preference ([`SessionPolicy`]).
//! 2. **Is this session still valid right now?** Checked against an
//!    expiry instant with an optional grace window that tolerates clock
//!    skew and races immediately after authenticating.
//!
//! Everything here is pure: time flows in as a parameter, decisions flow
//! out as values. No I/O, no storage, no timers. That keeps the boundary
//! cases (expiry instants, grace windows) trivially testable.
//!
//! # How it fits in the stack
//!
//! ```text
//! Auth store / refresh coordinator (above) <- ask "when does this expire?"
//!     |
//! Policy layer (this crate)                <- timeout table, grace rules
//!     |
//! Token layer (below)                      <- Role, UnixMillis
//! ```

mod config;
mod session;

pub use config::{PolicyConfig, SessionPolicy};
pub use session::Session;
