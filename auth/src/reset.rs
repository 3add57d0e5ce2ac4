//! Single-use password reset tokens.
//!
//! The plaintext is handed to the caller once; only its SHA-256 digest is
//! meant to be stored.

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;

/// Bytes of entropy in every generated token.
const TOKEN_BYTES: usize = 32;

/// Freshly generated reset token triple.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetToken {
    /// Hex-encoded random value, delivered to the user
    pub plain: String,
    /// Hex-encoded SHA-256 of `plain`, suitable for persistence and lookup
    pub hash: String,
    /// Absolute expiry; the token is unusable from this instant on
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetToken")
            .field("plain", &"<redacted>")
            .field("hash", &self.hash)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Generates reset tokens with a fixed lifetime.
#[derive(Debug, Clone, Copy)]
pub struct ResetTokenGenerator {
    ttl: Duration,
}

impl ResetTokenGenerator {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a token expiring `ttl` after `now`.
    pub fn generate(&self, now: DateTime<Utc>) -> ResetToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plain = hex::encode(bytes);
        let hash = hash_reset_token(&plain);

        ResetToken {
            plain,
            hash,
            expires_at: now + self.ttl,
        }
    }
}

impl Default for ResetTokenGenerator {
    fn default() -> Self {
        Self::new(Duration::minutes(10))
    }
}

/// SHA-256 of a plaintext reset token, hex-encoded.
pub fn hash_reset_token(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}
