use std::sync::Arc;

use async_trait::async_trait;
use auth::AuthenticationError;
use auth::Authenticator;
use chrono::DateTime;
use chrono::Utc;

use crate::domain::mail::models::EmailMessage;
use crate::domain::mail::ports::Mailer;
use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::models::OwnerSummary;
use crate::domain::resource::ports::OwnerDirectory;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::LoginCommand;
use crate::domain::user::models::PasswordChange;
use crate::domain::user::models::RegisterCommand;
use crate::domain::user::models::ResetPasswordCommand;
use crate::domain::user::models::ResetPasswordToken;
use crate::domain::user::models::Role;
use crate::domain::user::models::Session;
use crate::domain::user::models::UpdatePasswordCommand;
use crate::domain::user::models::UpdateProfileCommand;
use crate::domain::user::models::UpdateUserCommand;
use crate::domain::user::models::User;
use crate::domain::user::models::UserChanges;
use crate::domain::user::models::UserId;
use crate::user::errors::SessionError;
use crate::user::errors::UserError;
use crate::user::ports::UserRepository;
use crate::user::ports::UserServicePort;

/// Domain service implementation for user and session operations.
///
/// Concrete implementation of UserServicePort with dependency injection.
pub struct UserService<UR, M>
where
    UR: UserRepository,
    M: Mailer,
{
    repository: Arc<UR>,
    mailer: Arc<M>,
    authenticator: Arc<Authenticator>,
}

impl<UR, M> UserService<UR, M>
where
    UR: UserRepository,
    M: Mailer,
{
    /// Create a new user service with injected dependencies.
    ///
    /// # Arguments
    /// * `repository` - User persistence implementation
    /// * `mailer` - Outbound email delivery
    /// * `authenticator` - Password, session and reset token primitives
    ///
    /// # Returns
    /// Configured user service instance
    pub fn new(repository: Arc<UR>, mailer: Arc<M>, authenticator: Arc<Authenticator>) -> Self {
        Self {
            repository,
            mailer,
            authenticator,
        }
    }

    fn open_session(&self, user: User, issued_at: DateTime<Utc>) -> Result<Session, UserError> {
        let result = self
            .authenticator
            .issue_token(&user.id.to_string(), issued_at)?;

        Ok(Session {
            user,
            token: result.access_token,
            expires_at: result.expires_at,
        })
    }

    async fn require_user(&self, id: &UserId) -> Result<User, UserError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| UserError::NotFound(id.to_string()))
    }

    async fn apply_changes(&self, id: &UserId, changes: UserChanges) -> Result<User, UserError> {
        self.repository
            .update_fields(id, &changes)
            .await?
            .ok_or_else(|| UserError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl<UR, M> UserServicePort for UserService<UR, M>
where
    UR: UserRepository,
    M: Mailer,
{
    async fn register(&self, command: RegisterCommand) -> Result<Session, UserError> {
        let password_hash = self
            .authenticator
            .hash_password(command.password.expose())?;
        let now = Utc::now();

        let user = User {
            id: UserId::new(),
            username: command.username,
            email: command.email,
            name: command.name,
            role: Role::User,
            password_hash,
            password_changed_at: None,
            reset_password: None,
            active: true,
            created_at: now,
        };

        let created = self.repository.create(user).await?;
        tracing::info!(user_id = %created.id, username = %created.username, "User registered");

        self.open_session(created, now)
    }

    async fn login(&self, command: LoginCommand) -> Result<Session, UserError> {
        let username = command.username.trim();
        if username.is_empty() || command.password.is_empty() {
            return Err(UserError::MissingInput("username and password"));
        }

        let user = self
            .repository
            .find_by_username(username)
            .await?
            .ok_or(UserError::IncorrectCredentials)?;

        let now = Utc::now();
        let result = self
            .authenticator
            .authenticate(
                &command.password,
                &user.password_hash,
                &user.id.to_string(),
                now,
            )
            .map_err(|e| match e {
                AuthenticationError::InvalidCredentials => UserError::IncorrectCredentials,
                AuthenticationError::JwtError(e) => UserError::Token(e),
            })?;

        tracing::debug!(user_id = %user.id, "User logged in");

        Ok(Session {
            user,
            token: result.access_token,
            expires_at: result.expires_at,
        })
    }

    async fn authenticate(&self, token: &str) -> Result<User, SessionError> {
        let session = self.authenticator.validate_token(token)?;
        let id = UserId::from_string(&session.subject).map_err(|_| SessionError::MalformedToken)?;

        let user = self
            .repository
            .find_by_id(&id)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?
            .ok_or(SessionError::PrincipalGone)?;

        if user.changed_password_after(session.issued_at) {
            return Err(SessionError::Revoked);
        }

        Ok(user)
    }

    async fn forgot_password(
        &self,
        email: &str,
        reset_url_base: &str,
    ) -> Result<EmailAddress, UserError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(UserError::MissingInput("your email address"));
        }
        let email = EmailAddress::new(email.to_string())?;

        let user = self
            .repository
            .find_by_email(&email)
            .await?
            .ok_or_else(|| UserError::NotFoundByEmail(email.to_string()))?;

        // Stage the token first; the user may never receive it.
        let token = self.authenticator.generate_reset_token(Utc::now());
        self.repository
            .set_reset_token(
                &user.id,
                Some(ResetPasswordToken {
                    token_hash: token.hash.clone(),
                    expires_at: token.expires_at,
                }),
            )
            .await?;

        let reset_url = format!("{}/{}", reset_url_base.trim_end_matches('/'), token.plain);
        let message = EmailMessage::password_reset(
            user.email.clone(),
            &reset_url,
            self.authenticator.reset_ttl().num_minutes(),
        );

        match self.mailer.send(message).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "Password reset token sent");
                Ok(user.email)
            }
            Err(err) => {
                tracing::error!(user_id = %user.id, error = %err, "Password reset email failed");
                if let Err(clear_err) = self.repository.set_reset_token(&user.id, None).await {
                    tracing::error!(
                        user_id = %user.id,
                        error = %clear_err,
                        "Failed to clear undelivered reset token"
                    );
                }
                Err(UserError::MailDelivery(err))
            }
        }
    }

    async fn reset_password(&self, command: ResetPasswordCommand) -> Result<Session, UserError> {
        let token_hash = self.authenticator.hash_reset_token(&command.token);
        let password_hash = self
            .authenticator
            .hash_password(command.password.expose())?;
        let now = Utc::now();

        let holder = self
            .repository
            .consume_reset_token(&token_hash, now)
            .await?
            .ok_or(UserError::InvalidResetToken)?;

        let user = self
            .repository
            .set_password(&holder.id, &PasswordChange::new(password_hash, now))
            .await?
            .ok_or_else(|| UserError::NotFound(holder.id.to_string()))?;
        tracing::info!(user_id = %user.id, "Password reset");

        self.open_session(user, now)
    }

    async fn update_password(
        &self,
        id: &UserId,
        command: UpdatePasswordCommand,
    ) -> Result<Session, UserError> {
        let current = self.require_user(id).await?;

        if !self
            .authenticator
            .verify_password(&command.current_password, &current.password_hash)
        {
            return Err(UserError::IncorrectCurrentPassword);
        }

        let password_hash = self
            .authenticator
            .hash_password(command.password.expose())?;
        let now = Utc::now();
        let change = PasswordChange::new(password_hash, now).replacing(&current.password_hash);

        // A concurrent change of the verified password wins.
        let Some(user) = self.repository.set_password(id, &change).await? else {
            self.require_user(id).await?;
            return Err(UserError::IncorrectCurrentPassword);
        };
        tracing::info!(user_id = %user.id, "Password changed");

        self.open_session(user, now)
    }

    async fn get_user(&self, id: &UserId) -> Result<User, UserError> {
        self.require_user(id).await
    }

    async fn update_profile(
        &self,
        id: &UserId,
        command: UpdateProfileCommand,
    ) -> Result<Session, UserError> {
        let user = self.apply_changes(id, command.into()).await?;
        self.open_session(user, Utc::now())
    }

    async fn deactivate(&self, id: &UserId) -> Result<(), UserError> {
        if !self.repository.set_active(id, false).await? {
            return Err(UserError::NotFound(id.to_string()));
        }

        tracing::info!(user_id = %id, "User deactivated");
        Ok(())
    }

    async fn list_users(&self, spec: &QuerySpec) -> Result<Vec<User>, UserError> {
        self.repository.list(spec).await
    }

    async fn update_user(
        &self,
        id: &UserId,
        command: UpdateUserCommand,
    ) -> Result<User, UserError> {
        self.apply_changes(id, command.into()).await
    }

    async fn delete_user(&self, id: &UserId) -> Result<(), UserError> {
        if !self.repository.delete(id).await? {
            return Err(UserError::NotFound(id.to_string()));
        }

        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }
}

#[async_trait]
impl<UR, M> OwnerDirectory for UserService<UR, M>
where
    UR: UserRepository,
    M: Mailer,
{
    async fn owner_summary(&self, id: &UserId) -> Result<Option<OwnerSummary>, ResourceError> {
        self.repository
            .find_by_id(id)
            .await
            .map(|user| user.as_ref().map(OwnerSummary::from))
            .map_err(|e| ResourceError::OwnerLookup(e.to_string()))
    }
}
