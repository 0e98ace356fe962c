//! Error types for the storage layer.

/// Errors raised while loading or persisting session state.
///
/// Both variants mean the persisted state cannot describe a session and
/// there is nothing to recover it from, so the caller clears it. An
/// unparsable expiry with an intact user snapshot is recoverable and is
/// surfaced as data, not as an error.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A persisted JSON payload (the user snapshot) failed to parse.
    #[error("persisted state is corrupted: {0}")]
    Corrupted(#[source] serde_json::Error),

    /// A token was persisted without its companion key.
    #[error("persisted state is incomplete: token present but `{0}` missing")]
    Incomplete(&'static str),
}
