use thiserror::Error;

/// Error type for session token operations.
///
/// Verification failures are split by cause so callers can report a
/// precise reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    EncodingFailed(String),

    #[error("Token is expired")]
    Expired,

    #[error("Token signature is invalid")]
    BadSignature,

    #[error("Token is malformed: {0}")]
    Malformed(String),
}
