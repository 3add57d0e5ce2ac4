//! Authentication utilities library
//!
//! Provides reusable authentication infrastructure:
//! - Password hashing (Argon2id)
//! - Session token issuance and verification (JWT, HS256)
//! - Single-use password reset tokens (random value + SHA-256 digest)
//! - Authentication coordination
//!
//! # Examples
//!
//! ## Password Hashing
//! ```
//! use auth::PasswordHasher;
//!
//! let hasher = PasswordHasher::new();
//! let hash = hasher.hash("my_password").unwrap();
//! assert!(hasher.verify("my_password", &hash));
//! ```
//!
//! ## Session Tokens
//! ```
//! use auth::JwtHandler;
//! use chrono::{Duration, Utc};
//!
//! let handler = JwtHandler::new(b"secret_key_at_least_32_bytes_long!", Duration::days(1));
//! let token = handler.issue("user123", Utc::now()).unwrap();
//! let session = handler.verify(&token).unwrap();
//! assert_eq!(session.subject, "user123");
//! ```
//!
//! ## Reset Tokens
//! ```
//! use auth::reset::{hash_reset_token, ResetTokenGenerator};
//! use chrono::Utc;
//!
//! let token = ResetTokenGenerator::default().generate(Utc::now());
//! assert_eq!(hash_reset_token(&token.plain), token.hash);
//! ```

pub mod authenticator;
pub mod jwt;
pub mod password;
pub mod reset;

// Re-export commonly used items
pub use authenticator::AuthenticationError;
pub use authenticator::AuthenticationResult;
pub use authenticator::Authenticator;
pub use jwt::JwtError;
pub use jwt::JwtHandler;
pub use jwt::SessionClaims;
pub use jwt::VerifiedSession;
pub use password::PasswordError;
pub use password::PasswordHasher;
pub use reset::ResetToken;
