use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

use crate::user::errors::EmailError;
use crate::user::errors::NewPasswordError;
use crate::user::errors::RoleError;
use crate::user::errors::UserIdError;
use crate::user::errors::UsernameError;

/// User aggregate entity.
///
/// The authenticated principal of every session.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: EmailAddress,
    pub name: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub reset_password: Option<ResetPasswordToken>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the password changed after a session issued at `issued_at`.
    ///
    /// Compared at millisecond resolution, the precision of the session
    /// token. The session opened by the change itself shares its instant and
    /// stays valid.
    pub fn changed_password_after(&self, issued_at: DateTime<Utc>) -> bool {
        self.password_changed_at.is_some_and(|changed_at| {
            changed_at.timestamp_millis() > issued_at.timestamp_millis()
        })
    }

    /// Replace the password hash and record when it happened.
    pub fn apply_password(&mut self, change: &PasswordChange) {
        self.password_hash = change.password_hash.clone();
        self.password_changed_at = Some(change.changed_at);
    }

    /// Public JSON view of the user, as returned to clients and matched by
    /// listing queries. Credentials and reset state never appear here.
    pub fn to_document(&self) -> Value {
        let mut document = Map::new();
        document.insert("id".to_string(), Value::String(self.id.to_string()));
        document.insert(
            "username".to_string(),
            Value::String(self.username.as_str().to_string()),
        );
        document.insert(
            "email".to_string(),
            Value::String(self.email.as_str().to_string()),
        );
        if let Some(name) = &self.name {
            document.insert("name".to_string(), Value::String(name.clone()));
        }
        document.insert("role".to_string(), Value::String(self.role.as_str().to_string()));
        document.insert("active".to_string(), Value::Bool(self.active));
        if let Some(changed_at) = self.password_changed_at {
            document.insert("passwordChangedAt".to_string(), timestamp(changed_at));
        }
        document.insert("createdAt".to_string(), timestamp(self.created_at));
        Value::Object(document)
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Pending password reset: digest of the emailed token and its expiry.
///
/// Hash and expiry only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPasswordToken {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetPasswordToken {
    /// Usable strictly before `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn matches(&self, token_hash: &str, now: DateTime<Utc>) -> bool {
        self.token_hash == token_hash && self.is_valid_at(now)
    }
}

/// User unique identifier type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Generate a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a user ID from string.
    ///
    /// # Errors
    /// * `InvalidFormat` - String is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self, UserIdError> {
        Uuid::parse_str(s)
            .map(UserId)
            .map_err(|e| UserIdError::InvalidFormat(e.to_string()))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Access role of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(RoleError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username value type
///
/// Ensures username is 1-32 characters and contains only alphanumeric, underscore, and hyphen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Username(String);

impl Username {
    const MIN_LENGTH: usize = 1;
    const MAX_LENGTH: usize = 32;

    /// Create a new valid username.
    ///
    /// # Errors
    /// * `TooShort` - Username is empty
    /// * `TooLong` - Username longer than 32 characters
    /// * `InvalidCharacters` - Contains non-alphanumeric characters (except _ and -)
    pub fn new(username: String) -> Result<Self, UsernameError> {
        let username = Self::with_valid_length(username.trim().to_string())?;
        let username = Self::with_valid_chars(username)?;
        Ok(Self(username))
    }

    fn with_valid_length(username: String) -> Result<String, UsernameError> {
        let length = username.chars().count();
        if length < Self::MIN_LENGTH {
            Err(UsernameError::TooShort {
                min: Self::MIN_LENGTH,
                actual: length,
            })
        } else if length > Self::MAX_LENGTH {
            Err(UsernameError::TooLong {
                max: Self::MAX_LENGTH,
                actual: length,
            })
        } else {
            Ok(username)
        }
    }

    fn with_valid_chars(username: String) -> Result<String, UsernameError> {
        if username
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            Ok(username)
        } else {
            Err(UsernameError::InvalidCharacters)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Email address type
///
/// Validated with an RFC 5322 parser and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Create a new validated email address.
    ///
    /// # Errors
    /// * `InvalidFormat` - Email does not conform to RFC 5322
    pub fn new(email: String) -> Result<Self, EmailError> {
        let email = email.trim().to_lowercase();
        email_address::EmailAddress::from_str(&email)
            .map(|_| EmailAddress(email))
            .map_err(|e| EmailError::InvalidFormat(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A new password together with its confirmation.
///
/// Construction fails unless both are present and identical, so holding a
/// `NewPassword` means the confirmation check has passed.
pub struct NewPassword(String);

impl NewPassword {
    /// # Errors
    /// * `Missing` - Password is empty
    /// * `ConfirmationMismatch` - Confirmation differs from the password
    pub fn new(password: String, confirmation: String) -> Result<Self, NewPasswordError> {
        if password.is_empty() {
            return Err(NewPasswordError::Missing);
        }
        if password != confirmation {
            return Err(NewPasswordError::ConfirmationMismatch);
        }
        Ok(Self(password))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NewPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NewPassword(<redacted>)")
    }
}

/// Command to register a new principal
#[derive(Debug)]
pub struct RegisterCommand {
    pub username: Username,
    pub email: EmailAddress,
    pub name: Option<String>,
    pub password: NewPassword,
}

/// Command to authenticate with username and password
#[derive(Debug)]
pub struct LoginCommand {
    pub username: String,
    pub password: String,
}

/// Command to consume a reset token and set a new password
#[derive(Debug)]
pub struct ResetPasswordCommand {
    pub token: String,
    pub password: NewPassword,
}

/// Command for an authenticated password change
#[derive(Debug)]
pub struct UpdatePasswordCommand {
    pub current_password: String,
    pub password: NewPassword,
}

/// Command for a principal editing their own profile.
///
/// Only the whitelisted profile fields exist here; password changes go
/// through `UpdatePasswordCommand`.
#[derive(Debug, Default)]
pub struct UpdateProfileCommand {
    pub name: Option<String>,
    pub username: Option<Username>,
    pub email: Option<EmailAddress>,
}

/// Command for an administrator editing any user.
#[derive(Debug, Default)]
pub struct UpdateUserCommand {
    pub name: Option<String>,
    pub username: Option<Username>,
    pub email: Option<EmailAddress>,
    pub role: Option<Role>,
}

/// Profile columns to overwrite; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub username: Option<Username>,
    pub email: Option<EmailAddress>,
    pub role: Option<Role>,
}

impl UserChanges {
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
    }
}

impl From<UpdateProfileCommand> for UserChanges {
    fn from(command: UpdateProfileCommand) -> Self {
        Self {
            name: command.name,
            username: command.username,
            email: command.email,
            role: None,
        }
    }
}

impl From<UpdateUserCommand> for UserChanges {
    fn from(command: UpdateUserCommand) -> Self {
        Self {
            name: command.name,
            username: command.username,
            email: command.email,
            role: command.role,
        }
    }
}

/// New credentials for a user.
///
/// With `expected_hash` set the write only lands while the stored hash is
/// still the one the caller verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordChange {
    pub password_hash: String,
    pub changed_at: DateTime<Utc>,
    pub expected_hash: Option<String>,
}

impl PasswordChange {
    pub fn new(password_hash: String, changed_at: DateTime<Utc>) -> Self {
        Self {
            password_hash,
            changed_at,
            expected_hash: None,
        }
    }

    pub fn replacing(mut self, current_hash: &str) -> Self {
        self.expected_hash = Some(current_hash.to_string());
        self
    }

    /// Whether the change may be applied over `stored_hash`.
    pub fn applies_to(&self, stored_hash: &str) -> bool {
        self.expected_hash
            .as_deref()
            .map_or(true, |expected| expected == stored_hash)
    }
}

/// An authenticated session: the principal plus a freshly issued token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::TimeZone;

    use super::*;

    fn user() -> User {
        User {
            id: UserId::new(),
            username: Username::new("alice".to_string()).unwrap(),
            email: EmailAddress::new("alice@example.com".to_string()).unwrap(),
            name: None,
            role: Role::User,
            password_hash: "$argon2id$hash".to_string(),
            password_changed_at: None,
            reset_password: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_username_single_character_allowed() {
        assert_eq!(Username::new("a".to_string()).unwrap().as_str(), "a");
    }

    #[test]
    fn test_username_rejects_empty_and_long() {
        assert!(matches!(
            Username::new("".to_string()),
            Err(UsernameError::TooShort { .. })
        ));
        assert!(matches!(
            Username::new("x".repeat(33)),
            Err(UsernameError::TooLong { .. })
        ));
        assert_eq!(
            Username::new("bad name".to_string()),
            Err(UsernameError::InvalidCharacters)
        );
    }

    #[test]
    fn test_email_normalized() {
        let email = EmailAddress::new("  A@X.com ".to_string()).unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        assert!(EmailAddress::new("not-an-email".to_string()).is_err());
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(Role::User.to_string(), "user");
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_new_password_confirmation() {
        assert!(NewPassword::new("p1".to_string(), "p1".to_string()).is_ok());
        assert_eq!(
            NewPassword::new("p1".to_string(), "p2".to_string()).unwrap_err(),
            NewPasswordError::ConfirmationMismatch
        );
        assert_eq!(
            NewPassword::new(String::new(), String::new()).unwrap_err(),
            NewPasswordError::Missing
        );
    }

    #[test]
    fn test_document_hides_credentials() {
        let mut user = user();
        user.reset_password = Some(ResetPasswordToken {
            token_hash: "digest".to_string(),
            expires_at: Utc::now(),
        });

        let document = user.to_document();

        assert_eq!(document["username"], "alice");
        assert_eq!(document["role"], "user");
        assert!(document.get("password_hash").is_none());
        assert!(document.get("passwordHash").is_none());
        assert!(!document.to_string().contains("digest"));
    }

    #[test]
    fn test_changed_password_after() {
        let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut user = user();
        assert!(!user.changed_password_after(issued_at));

        user.password_changed_at = Some(issued_at + Duration::seconds(1));
        assert!(user.changed_password_after(issued_at));

        user.password_changed_at = Some(issued_at + Duration::milliseconds(500));
        assert!(user.changed_password_after(issued_at));

        user.password_changed_at = Some(issued_at);
        assert!(!user.changed_password_after(issued_at));

        user.password_changed_at = Some(issued_at - Duration::hours(1));
        assert!(!user.changed_password_after(issued_at));
    }

    #[test]
    fn test_user_changes_leave_credentials_alone() {
        let mut user = user();
        user.password_changed_at = Some(Utc::now());
        let before = user.clone();

        UserChanges {
            name: Some("Alice".to_string()),
            role: Some(Role::Admin),
            ..Default::default()
        }
        .apply(&mut user);

        assert_eq!(user.name.as_deref(), Some("Alice"));
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.username, before.username);
        assert_eq!(user.password_hash, before.password_hash);
        assert_eq!(user.password_changed_at, before.password_changed_at);
    }

    #[test]
    fn test_password_change_guarded_by_expected_hash() {
        let change = PasswordChange::new("$argon2id$new".to_string(), Utc::now());
        assert!(change.applies_to("anything"));

        let guarded = change.replacing("$argon2id$old");
        assert!(guarded.applies_to("$argon2id$old"));
        assert!(!guarded.applies_to("$argon2id$other"));
    }

    #[test]
    fn test_reset_token_expiry_boundary() {
        let expires_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
        let token = ResetPasswordToken {
            token_hash: "abc".to_string(),
            expires_at,
        };

        assert!(token.matches("abc", expires_at - Duration::milliseconds(1)));
        assert!(!token.matches("abc", expires_at));
        assert!(!token.matches("abd", expires_at - Duration::minutes(1)));
    }
}
