//! Shared persistent storage and cross-tab synchronization for Authflow.
//!
//! This crate owns the single cross-tab source of truth:
//!
//! 1. **Backend** ([`StorageBackend`] trait, [`MemoryStorage`]): a small
//!    key/value surface where a write by one handle is observable as a
//!    change notification by every *other* handle of the same store. Each
//!    handle models one browser tab of the same origin.
//! 2. **Typed persistence** ([`SessionStore`]): the only code that reads
//!    and writes the session keys. It enforces the invariant that the
//!    token and the session expiry are written in the same step.
//! 3. **Cross-tab sync** ([`SyncTransport`], [`StorageSync`], [`LocalBus`]):
//!    an explicit publish/subscribe interface for the Login/Logout
//!    broadcast channels, with a storage-backed transport for multi-tab
//!    and an in-process bus for single-process contexts and tests.
//!
//! # How it fits in the stack
//!
//! ```text
//! Auth store / refresh coordinator (above) <- persist, load, broadcast
//!     |
//! Storage layer (this crate)               <- keys, change notifications
//!     |
//! Token layer (below)                      <- User, tokens, UnixMillis
//! ```

mod backend;
mod error;
pub mod keys;
mod store;
mod sync;

pub use backend::{MemoryStorage, StorageBackend, StorageChange, StorageEvents};
pub use error::StorageError;
pub use store::{PersistedSession, SessionStore};
pub use sync::{LocalBus, StorageSync, SyncEvent, SyncTransport};
