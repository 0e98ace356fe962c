//! Reconnecting server-push event stream for Authflow.
//!
//! Maintains one long-lived connection to the push endpoint and fans
//! inbound events out to listeners by event name:
//!
//! - **Lazy, reference-counted lifecycle**: the connection opens on the
//!   first listener registration across any event name and closes when
//!   the last listener across all names goes away.
//! - **Bounded reconnect**: a connection failure schedules exactly one
//!   reconnect after a fixed delay; a further failure before it fires
//!   replaces the pending attempt, it never stacks a second one.
//! - **Frame isolation**: a malformed payload is logged and skipped; it
//!   cannot affect the dispatch of later or unrelated frames.
//!
//! The wire sits behind the [`StreamConnector`] seam. The provided
//! implementation is WebSocket ([`WebSocketConnector`], `websocket`
//! feature, on by default); tests drive the client with scripted
//! connectors.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod client;
mod connector;
mod error;

pub use client::{EventStreamClient, StreamConfig, Subscription};
pub use connector::{StreamConnection, StreamConnector, StreamEvent};
#[cfg(feature = "websocket")]
pub use connector::{WebSocketConnection, WebSocketConnector};
pub use error::StreamError;
