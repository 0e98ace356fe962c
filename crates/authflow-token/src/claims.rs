//! Structural validation and claim decoding of a signed token.
//!
//! The token is treated as opaque apart from its shape: three dot-separated
//! base64url segments, the middle one a JSON object of claims. Signature
//! verification is the server's job; the client only needs to read the
//! expiry and subject to schedule refreshes.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{TokenError, UnixMillis};

/// Number of dot-separated segments in a well-formed token.
const SEGMENT_COUNT: usize = 3;

/// The decoded claims of a token payload.
///
/// Unknown claims are ignored; only the fields the lifecycle manager needs
/// are kept. `exp` is required, everything else is best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration instant, unix seconds.
    pub exp: i64,
    /// Subject, usually the user id or username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Role claim as issued by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    /// The expiration instant in milliseconds.
    pub fn expires_at(&self) -> UnixMillis {
        UnixMillis::from_secs(self.exp)
    }

    /// Whether the token is expired, or will be within `buffer` of `now`.
    ///
    /// A zero buffer gives the exact boundary: a token whose `exp` equals
    /// `now` is already expired.
    pub fn is_expired(&self, buffer: Duration, now: UnixMillis) -> bool {
        self.expires_at().get() <= (now + buffer).get()
    }
}

/// Decodes the claims of a token after validating its structure.
///
/// Fails unless the token has exactly three non-empty segments, each
/// restricted to the base64url charset, and the middle segment decodes to
/// a JSON object carrying an `exp` claim. Deterministic, no I/O.
///
/// # Errors
/// See [`TokenError`] for the failure taxonomy. All failures mean the
/// token cannot be trusted to describe a session.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != SEGMENT_COUNT {
        return Err(TokenError::SegmentCount(segments.len()));
    }
    for segment in &segments {
        if segment.is_empty() {
            return Err(TokenError::EmptySegment);
        }
        if !segment.bytes().all(is_base64url_byte) {
            return Err(TokenError::InvalidCharset);
        }
    }

    // Padding is tolerated on the wire but the engine rejects it, so strip
    // before decoding.
    let payload = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    let value: serde_json::Value = serde_json::from_slice(&payload)?;
    let object = value.as_object().ok_or(TokenError::NotAnObject)?;
    if !object.contains_key("exp") {
        return Err(TokenError::MissingClaim("exp"));
    }

    Ok(serde_json::from_value(value)?)
}

/// Bytes allowed in a token segment: base64url plus `=` padding.
fn is_base64url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'='
}
