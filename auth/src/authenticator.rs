use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

use crate::jwt::JwtError;
use crate::jwt::JwtHandler;
use crate::jwt::VerifiedSession;
use crate::password::PasswordError;
use crate::password::PasswordHasher;
use crate::reset::ResetToken;
use crate::reset::ResetTokenGenerator;

/// Authentication coordinator combining password verification, session
/// tokens and reset tokens.
///
/// Holds only process-wide immutable settings, so a single instance is
/// shared behind an `Arc` by every request.
#[derive(Clone)]
pub struct Authenticator {
    password_hasher: PasswordHasher,
    jwt_handler: JwtHandler,
    reset_tokens: ResetTokenGenerator,
}

/// Result of successful authentication.
pub struct AuthenticationResult {
    /// Session token
    pub access_token: String,
    /// Expiry of the session token
    pub expires_at: DateTime<Utc>,
}

/// Authentication operation errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("JWT error: {0}")]
    JwtError(#[from] JwtError),
}

impl Authenticator {
    /// Create a new authenticator.
    ///
    /// # Arguments
    /// * `jwt_secret` - Secret key for session token signing
    /// * `session_ttl` - Lifetime of issued session tokens
    /// * `reset_ttl` - Lifetime of password reset tokens
    pub fn new(jwt_secret: &[u8], session_ttl: Duration, reset_ttl: Duration) -> Self {
        Self {
            password_hasher: PasswordHasher::new(),
            jwt_handler: JwtHandler::new(jwt_secret, session_ttl),
            reset_tokens: ResetTokenGenerator::new(reset_ttl),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.jwt_handler.ttl()
    }

    pub fn reset_ttl(&self) -> Duration {
        self.reset_tokens.ttl()
    }

    /// Hash a password for storage.
    ///
    /// # Errors
    /// * `PasswordError` - Hashing operation failed
    pub fn hash_password(&self, password: &str) -> Result<String, PasswordError> {
        self.password_hasher.hash(password)
    }

    /// Check a plaintext password against a stored hash.
    pub fn verify_password(&self, password: &str, stored_hash: &str) -> bool {
        self.password_hasher.verify(password, stored_hash)
    }

    /// Verify credentials and issue a session token.
    ///
    /// # Errors
    /// * `InvalidCredentials` - Password does not match
    /// * `JwtError` - Token generation failed
    pub fn authenticate(
        &self,
        password: &str,
        stored_hash: &str,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        if !self.verify_password(password, stored_hash) {
            return Err(AuthenticationError::InvalidCredentials);
        }

        Ok(self.issue_token(subject, issued_at)?)
    }

    /// Issue a session token without password verification.
    ///
    /// Used after registration, password reset and password change, where
    /// the caller has already established the principal's identity.
    pub fn issue_token(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<AuthenticationResult, JwtError> {
        let access_token = self.jwt_handler.issue(subject, issued_at)?;

        Ok(AuthenticationResult {
            access_token,
            expires_at: issued_at + self.jwt_handler.ttl(),
        })
    }

    /// Validate a session token's signature and expiry.
    pub fn validate_token(&self, token: &str) -> Result<VerifiedSession, JwtError> {
        self.jwt_handler.verify(token)
    }

    /// Generate a password reset token expiring relative to `now`.
    pub fn generate_reset_token(&self, now: DateTime<Utc>) -> ResetToken {
        self.reset_tokens.generate(now)
    }

    /// Hash a plaintext reset token for lookup.
    pub fn hash_reset_token(&self, plain: &str) -> String {
        crate::reset::hash_reset_token(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new(
            b"test_secret_key_at_least_32_bytes!",
            Duration::days(90),
            Duration::minutes(10),
        )
    }

    #[test]
    fn test_authenticate_success() {
        let authenticator = authenticator();

        let password = "my_password";
        let hash = authenticator
            .hash_password(password)
            .expect("Failed to hash password");

        let now = Utc::now();
        let result = authenticator
            .authenticate(password, &hash, "user123", now)
            .expect("Authentication failed");

        assert!(!result.access_token.is_empty());
        assert_eq!(result.expires_at, now + Duration::days(90));

        let verified = authenticator
            .validate_token(&result.access_token)
            .expect("Token validation failed");
        assert_eq!(verified.subject, "user123");
    }

    #[test]
    fn test_authenticate_invalid_password() {
        let authenticator = authenticator();

        let hash = authenticator
            .hash_password("my_password")
            .expect("Failed to hash password");

        let result = authenticator.authenticate("wrong_password", &hash, "user123", Utc::now());
        assert!(matches!(
            result,
            Err(AuthenticationError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_validate_invalid_token() {
        let result = authenticator().validate_token("invalid.token.here");
        assert!(matches!(result, Err(JwtError::Malformed(_))));
    }

    #[test]
    fn test_reset_token_hash_matches_generated() {
        let authenticator = authenticator();
        let token = authenticator.generate_reset_token(Utc::now());

        assert_eq!(authenticator.hash_reset_token(&token.plain), token.hash);
    }
}
