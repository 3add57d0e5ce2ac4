use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::LoginCommand;
use crate::domain::user::models::PasswordChange;
use crate::domain::user::models::RegisterCommand;
use crate::domain::user::models::ResetPasswordCommand;
use crate::domain::user::models::ResetPasswordToken;
use crate::domain::user::models::Session;
use crate::domain::user::models::UpdatePasswordCommand;
use crate::domain::user::models::UpdateProfileCommand;
use crate::domain::user::models::UpdateUserCommand;
use crate::domain::user::models::User;
use crate::domain::user::models::UserChanges;
use crate::domain::user::models::UserId;
use crate::user::errors::SessionError;
use crate::user::errors::UserError;

/// Port for user domain service operations.
#[async_trait]
pub trait UserServicePort: Send + Sync + 'static {
    /// Register a new principal and open a session for it.
    ///
    /// # Arguments
    /// * `command` - Validated username, email and confirmed password
    ///
    /// # Returns
    /// Session for the created user
    ///
    /// # Errors
    /// * `UsernameAlreadyExists` - Username is already taken
    /// * `EmailAlreadyExists` - Email is already registered
    /// * `Password` - Hashing failed
    async fn register(&self, command: RegisterCommand) -> Result<Session, UserError>;

    /// Verify username and password and open a session.
    ///
    /// # Errors
    /// * `MissingInput` - Username or password is empty
    /// * `IncorrectCredentials` - Unknown username or wrong password
    async fn login(&self, command: LoginCommand) -> Result<Session, UserError>;

    /// Resolve a session token into its live principal.
    ///
    /// # Errors
    /// * `Expired` / `BadSignature` / `MalformedToken` - Token failed verification
    /// * `PrincipalGone` - User was deleted or deactivated
    /// * `Revoked` - Password changed after the token was issued
    async fn authenticate(&self, token: &str) -> Result<User, SessionError>;

    /// Start the reset flow: stage a reset token and email its link.
    ///
    /// # Arguments
    /// * `email` - Address as typed by the caller
    /// * `reset_url_base` - URL the plaintext token is appended to
    ///
    /// # Returns
    /// The address the link was sent to
    ///
    /// # Errors
    /// * `MissingInput` - Email is empty
    /// * `NotFoundByEmail` - No user has this address
    /// * `MailDelivery` - Sending failed; the staged token has been cleared
    async fn forgot_password(
        &self,
        email: &str,
        reset_url_base: &str,
    ) -> Result<EmailAddress, UserError>;

    /// Consume a reset token and set a new password.
    ///
    /// # Errors
    /// * `InvalidResetToken` - No user holds this token, or it has expired
    async fn reset_password(&self, command: ResetPasswordCommand) -> Result<Session, UserError>;

    /// Change the password of an authenticated user.
    ///
    /// # Errors
    /// * `IncorrectCurrentPassword` - Current password does not match
    async fn update_password(
        &self,
        id: &UserId,
        command: UpdatePasswordCommand,
    ) -> Result<Session, UserError>;

    /// Retrieve a user by unique identifier.
    ///
    /// # Errors
    /// * `NotFound` - No active user with this ID
    async fn get_user(&self, id: &UserId) -> Result<User, UserError>;

    /// Let a user edit their own profile; reissues the session.
    async fn update_profile(
        &self,
        id: &UserId,
        command: UpdateProfileCommand,
    ) -> Result<Session, UserError>;

    /// Soft-delete the calling user.
    async fn deactivate(&self, id: &UserId) -> Result<(), UserError>;

    /// List users through the query pipeline.
    async fn list_users(&self, spec: &QuerySpec) -> Result<Vec<User>, UserError>;

    /// Administrative update of any user.
    ///
    /// # Errors
    /// * `NotFound` - No user with this ID
    async fn update_user(&self, id: &UserId, command: UpdateUserCommand)
        -> Result<User, UserError>;

    /// Permanently remove a user.
    ///
    /// # Errors
    /// * `NotFound` - No user with this ID, including on repeated deletes
    async fn delete_user(&self, id: &UserId) -> Result<(), UserError>;
}

/// Port for user persistence operations.
///
/// Finders only see active users.
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Persist new user.
    ///
    /// # Errors
    /// * `UsernameAlreadyExists` - Username is already taken
    /// * `EmailAlreadyExists` - Email is already registered
    /// * `DatabaseError` - Database operation failed
    async fn create(&self, user: User) -> Result<User, UserError>;

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, UserError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError>;

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserError>;

    /// Execute a composed query over all users, active or not.
    async fn list(&self, spec: &QuerySpec) -> Result<Vec<User>, UserError>;

    /// Overwrite the given profile columns of an active user in one write;
    /// credentials and reset state are never touched.
    ///
    /// # Returns
    /// The user after the write, or `None` if no active user has this ID
    ///
    /// # Errors
    /// * `UsernameAlreadyExists` / `EmailAlreadyExists` - Unique field collides
    async fn update_fields(
        &self,
        id: &UserId,
        changes: &UserChanges,
    ) -> Result<Option<User>, UserError>;

    /// Write the password hash and change instant in one write.
    ///
    /// # Returns
    /// The user after the write; `None` if no active user has this ID or the
    /// stored hash no longer matches `change.expected_hash`
    async fn set_password(
        &self,
        id: &UserId,
        change: &PasswordChange,
    ) -> Result<Option<User>, UserError>;

    /// Flip the active flag of a user that currently has the opposite one.
    ///
    /// # Returns
    /// Whether a user changed
    async fn set_active(&self, id: &UserId, active: bool) -> Result<bool, UserError>;

    /// Write only the reset token fields, skipping profile validation.
    async fn set_reset_token(
        &self,
        id: &UserId,
        token: Option<ResetPasswordToken>,
    ) -> Result<(), UserError>;

    /// Atomically find the user holding an unexpired token with this hash and
    /// clear the token.
    ///
    /// # Returns
    /// The user as it was matched, with the token already cleared; `None` if
    /// no user holds a matching token valid at `now`
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, UserError>;

    /// Remove a user.
    ///
    /// # Returns
    /// Whether a user was removed
    async fn delete(&self, id: &UserId) -> Result<bool, UserError>;
}
