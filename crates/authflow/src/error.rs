//! Unified error type for the Authflow facade.

use authflow_refresh::{ApiError, RefreshError};
use authflow_storage::StorageError;
use authflow_token::TokenError;

/// Top-level error wrapping all layer-specific errors.
///
/// When using the `authflow` facade, callers deal with this single type;
/// the `#[from]` impls let `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum AuthflowError {
    /// An auth server call failed (login, logout, session check).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The refresh coordinator failed (and has already applied the
    /// state-handling its taxonomy dictates).
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Persisted state was unreadable.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A token failed structural validation.
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_api_error() {
        let err: AuthflowError = ApiError::Timeout.into();
        assert!(matches!(err, AuthflowError::Api(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_from_refresh_error() {
        let err: AuthflowError = RefreshError::Api(ApiError::Unauthorized(401)).into();
        assert!(matches!(err, AuthflowError::Refresh(_)));
    }

    #[test]
    fn test_from_token_error() {
        let err: AuthflowError = TokenError::EmptySegment.into();
        assert!(matches!(err, AuthflowError::Token(_)));
    }
}
