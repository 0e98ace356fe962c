//! Error types for the refresh layer.

use authflow_storage::StorageError;
use authflow_token::TokenError;

/// Errors returned by the auth server API.
///
/// The taxonomy drives state handling: transient errors preserve all
/// local state and are retried on the next scheduled check; authorization
/// errors are fatal and clear state (grace window permitting).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection-level failure reaching the server.
    #[error("network failure talking to the auth server: {0}")]
    Network(#[source] reqwest::Error),

    /// The request hit its deadline before the server answered.
    #[error("auth server request timed out")]
    Timeout,

    /// 401/403: the server rejected the credentials or token.
    #[error("auth server rejected the request ({0})")]
    Unauthorized(u16),

    /// Any other non-success status.
    #[error("auth server returned unexpected status {0}")]
    Server(u16),

    /// The response arrived but its body was undecodable.
    #[error("auth server response was undecodable: {0}")]
    Decode(#[source] reqwest::Error),
}

impl ApiError {
    /// Whether retrying later could plausibly succeed. Transient errors
    /// must leave all session state untouched.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout | ApiError::Server(_)
        )
    }

    /// Whether this is a 401/403 authorization rejection.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Errors surfaced by the refresh coordinator.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The server call itself failed; see [`ApiError`] for disposition.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The current token failed structural validation.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Persisted session state was unreadable.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RefreshError {
    /// Whether local state survived this failure and a later retry makes
    /// sense.
    pub fn is_transient(&self) -> bool {
        matches!(self, RefreshError::Api(e) if e.is_transient())
    }
}
