//! Error types for the token layer.

/// Errors raised while structurally validating or decoding a token.
///
/// Any of these means the token cannot be trusted to describe a session.
/// Callers treat them as "unauthenticated" and clear state, unless a
/// post-login grace window says to hold off.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token did not have exactly three dot-separated segments.
    #[error("expected 3 token segments, found {0}")]
    SegmentCount(usize),

    /// One of the segments was empty ("a..c").
    #[error("token segment is empty")]
    EmptySegment,

    /// A segment contained bytes outside the base64url alphabet.
    #[error("token segment contains non-base64url characters")]
    InvalidCharset,

    /// The claims segment was not decodable base64url.
    #[error("claims segment is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded claims segment was not valid JSON, or did not match the
    /// expected claim types.
    #[error("claims segment is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The claims payload decoded to something other than a JSON object.
    #[error("claims payload is not a JSON object")]
    NotAnObject,

    /// A required claim was absent.
    #[error("claims object is missing the `{0}` claim")]
    MissingClaim(&'static str),
}
