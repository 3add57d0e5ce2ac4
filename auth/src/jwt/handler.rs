use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use jsonwebtoken::decode;
use jsonwebtoken::encode;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;

use super::claims::SessionClaims;
use super::claims::VerifiedSession;
use super::errors::JwtError;

/// Session token service.
///
/// Signs `{sub, iat, exp, iat_ms}` with a server-held secret (HS256) and verifies
/// signature and expiry. Tokens are never persisted.
#[derive(Clone)]
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
}

impl JwtHandler {
    /// Create a new JWT handler with a secret key and session lifetime.
    ///
    /// # Arguments
    /// * `secret` - Secret key for signing tokens (should be stored securely)
    /// * `ttl` - Lifetime of every issued token
    ///
    /// # Security Notes
    /// - The secret should be at least 256 bits (32 bytes) for HS256
    /// - Store secrets in environment variables or secure vaults, never in code
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            ttl,
        }
    }

    /// Session lifetime applied to issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject` as of `issued_at`.
    ///
    /// Expiry is `issued_at + ttl`.
    ///
    /// # Errors
    /// * `EncodingFailed` - Token encoding failed
    pub fn issue(&self, subject: &str, issued_at: DateTime<Utc>) -> Result<String, JwtError> {
        let claims = SessionClaims::new(subject, issued_at, self.ttl);

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingFailed(e.to_string()))
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<VerifiedSession, JwtError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature and expiry of a token as of `now`.
    ///
    /// # Errors
    /// * `BadSignature` - Signed with a different secret or tampered with
    /// * `Expired` - `now` is at or past the `exp` claim
    /// * `Malformed` - Not a JWT, wrong algorithm, or missing claims
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedSession, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is checked below without leeway
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "iat", "exp"]);

        let claims = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => JwtError::BadSignature,
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Malformed(e.to_string()),
            })?;

        if claims.is_expired(now.timestamp()) {
            return Err(JwtError::Expired);
        }

        let issued_at = DateTime::from_timestamp_millis(claims.iat_ms)
            .ok_or_else(|| JwtError::Malformed("iat_ms out of range".to_string()))?;

        Ok(VerifiedSession {
            subject: claims.sub,
            issued_at,
        })
    }
}
