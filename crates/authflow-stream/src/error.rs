//! Error types for the event stream layer.

/// Errors raised by the stream transport.
///
/// All of them are treated the same way by the client: tear the
/// connection down and schedule a reconnect. The messages are kept as
/// strings so the client stays agnostic of the underlying transport
/// library.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Establishing the connection failed.
    #[error("event stream connect failed: {0}")]
    Connect(String),

    /// An established connection failed mid-stream.
    #[error("event stream connection failed: {0}")]
    Connection(String),
}
