use auth::JwtError;
use thiserror::Error;

use crate::domain::errors::MailError;

/// Error for UserId parsing failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UserIdError {
    #[error("Invalid UUID format: {0}")]
    InvalidFormat(String),
}

/// Error for Username validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("Username too short: minimum {min} characters, got {actual}")]
    TooShort { min: usize, actual: usize },

    #[error("Username too long: maximum {max} characters, got {actual}")]
    TooLong { max: usize, actual: usize },

    #[error(
        "Username contains invalid characters (only alphanumeric, underscore, and hyphen allowed)"
    )]
    InvalidCharacters,
}

/// Error for EmailAddress validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("Invalid email format: {0}")]
    InvalidFormat(String),
}

/// Error for Role parsing failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("Unknown role: {0}")]
    Unknown(String),
}

/// Error for new password validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NewPasswordError {
    #[error("Please provide a password")]
    Missing,

    #[error("Passwords are not the same")]
    ConfirmationMismatch,
}

/// Why a request could not be tied to a live session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("You are not logged in. Please log in to get access")]
    MissingToken,

    #[error("Your session has expired. Please log in again")]
    Expired,

    #[error("Invalid token signature. Please log in again")]
    BadSignature,

    #[error("Malformed session token. Please log in again")]
    MalformedToken,

    #[error("The user belonging to this token no longer exists")]
    PrincipalGone,

    #[error("User recently changed password. Please log in again")]
    Revoked,

    #[error("Session lookup failed: {0}")]
    Store(String),
}

impl From<JwtError> for SessionError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => SessionError::Expired,
            JwtError::BadSignature => SessionError::BadSignature,
            JwtError::Malformed(_) | JwtError::EncodingFailed(_) => SessionError::MalformedToken,
        }
    }
}

/// Top-level error for all user-related operations
#[derive(Debug, Clone, Error)]
pub enum UserError {
    // Value object validation errors (automatically converted via #[from])
    #[error("Invalid user ID: {0}")]
    InvalidUserId(#[from] UserIdError),

    #[error("Invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("Invalid role: {0}")]
    InvalidRole(#[from] RoleError),

    #[error("{0}")]
    InvalidPassword(#[from] NewPasswordError),

    #[error("Password error: {0}")]
    Password(#[from] auth::PasswordError),

    #[error("Token error: {0}")]
    Token(#[from] JwtError),

    // Domain-level errors
    #[error("Please provide {0}")]
    MissingInput(&'static str),

    #[error("Incorrect username or password")]
    IncorrectCredentials,

    #[error("Your current password is wrong")]
    IncorrectCurrentPassword,

    #[error("This route is not for password updates. Please use /update-my-password")]
    PasswordUpdateNotAllowed,

    #[error("Token is invalid or has expired")]
    InvalidResetToken,

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("There is no user with email address: {0}")]
    NotFoundByEmail(String),

    #[error("Username already exists: {0}")]
    UsernameAlreadyExists(String),

    #[error("Email already exists: {0}")]
    EmailAlreadyExists(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    // Infrastructure errors
    #[error("There was an error sending the email: {0}")]
    MailDelivery(#[from] MailError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for UserError {
    fn from(err: anyhow::Error) -> Self {
        UserError::Unknown(err.to_string())
    }
}
