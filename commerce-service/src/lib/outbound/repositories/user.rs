use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::QueryBuilder;
use sqlx::Row;

use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::PasswordChange;
use crate::domain::user::models::ResetPasswordToken;
use crate::domain::user::models::Role;
use crate::domain::user::models::User;
use crate::domain::user::models::UserChanges;
use crate::domain::user::models::UserId;
use crate::domain::user::models::Username;
use crate::domain::user::ports::UserRepository;
use crate::outbound::repositories::sql::push_query_clauses;
use crate::outbound::repositories::sql::Table;
use crate::user::errors::UserError;

const USER_COLUMNS: &str = "id, username, email, name, role, password_hash, password_changed_at, \
     reset_password_token_hash, reset_password_expires_at, active, created_at";

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &PgRow) -> Result<User, UserError> {
        let role: String = row.try_get("role").map_err(database_error)?;
        let token_hash: Option<String> = row
            .try_get("reset_password_token_hash")
            .map_err(database_error)?;
        let expires_at: Option<DateTime<Utc>> = row
            .try_get("reset_password_expires_at")
            .map_err(database_error)?;

        Ok(User {
            id: UserId(row.try_get("id").map_err(database_error)?),
            username: Username::new(row.try_get("username").map_err(database_error)?)?,
            email: EmailAddress::new(row.try_get("email").map_err(database_error)?)?,
            name: row.try_get("name").map_err(database_error)?,
            role: role.parse::<Role>()?,
            password_hash: row.try_get("password_hash").map_err(database_error)?,
            password_changed_at: row.try_get("password_changed_at").map_err(database_error)?,
            reset_password: match (token_hash, expires_at) {
                (Some(token_hash), Some(expires_at)) => Some(ResetPasswordToken {
                    token_hash,
                    expires_at,
                }),
                _ => None,
            },
            active: row.try_get("active").map_err(database_error)?,
            created_at: row.try_get("created_at").map_err(database_error)?,
        })
    }

    async fn find_active_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<User>, UserError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE {} = $1 AND active",
            USER_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }
}

fn database_error(e: sqlx::Error) -> UserError {
    UserError::DatabaseError(e.to_string())
}

/// Map unique violations on the written username or email to domain errors.
fn write_error(
    e: sqlx::Error,
    username: Option<&Username>,
    email: Option<&EmailAddress>,
) -> UserError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            match (db_err.constraint(), username, email) {
                (Some("users_username_key"), Some(username), _) => {
                    return UserError::UsernameAlreadyExists(username.as_str().to_string());
                }
                (Some("users_email_key"), _, Some(email)) => {
                    return UserError::EmailAlreadyExists(email.as_str().to_string());
                }
                _ => {}
            }
        }
    }
    UserError::DatabaseError(e.to_string())
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn create(&self, user: User) -> Result<User, UserError> {
        let (token_hash, expires_at) = match &user.reset_password {
            Some(token) => (Some(token.token_hash.as_str()), Some(token.expires_at)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, name, role, password_hash, password_changed_at,
                               reset_password_token_hash, reset_password_expires_at, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id.0)
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.name.as_deref())
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(user.password_changed_at)
        .bind(token_hash)
        .bind(expires_at)
        .bind(user.active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, Some(&user.username), Some(&user.email)))?;

        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, UserError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE id = $1 AND active",
            USER_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        self.find_active_by("username", username).await
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserError> {
        self.find_active_by("email", email.as_str()).await
    }

    async fn list(&self, spec: &QuerySpec) -> Result<Vec<User>, UserError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_query_clauses(&mut builder, Table::Users, spec);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        rows.iter().map(Self::row_to_user).collect()
    }

    async fn update_fields(
        &self,
        id: &UserId,
        changes: &UserChanges,
    ) -> Result<Option<User>, UserError> {
        // Unchanged columns keep whatever the row holds at write time.
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name), username = COALESCE($3, username),
                email = COALESCE($4, email), role = COALESCE($5, role)
            WHERE id = $1 AND active
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(id.0)
        .bind(changes.name.as_deref())
        .bind(changes.username.as_ref().map(Username::as_str))
        .bind(changes.email.as_ref().map(EmailAddress::as_str))
        .bind(changes.role.map(|role| role.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| write_error(e, changes.username.as_ref(), changes.email.as_ref()))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn set_password(
        &self,
        id: &UserId,
        change: &PasswordChange,
    ) -> Result<Option<User>, UserError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET password_hash = $2, password_changed_at = $3
            WHERE id = $1 AND active AND ($4::TEXT IS NULL OR password_hash = $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(id.0)
        .bind(&change.password_hash)
        .bind(change.changed_at)
        .bind(change.expected_hash.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn set_active(&self, id: &UserId, active: bool) -> Result<bool, UserError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET active = $2
            WHERE id = $1 AND active <> $2
            "#,
        )
        .bind(id.0)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_reset_token(
        &self,
        id: &UserId,
        token: Option<ResetPasswordToken>,
    ) -> Result<(), UserError> {
        let (token_hash, expires_at) = match token {
            Some(token) => (Some(token.token_hash), Some(token.expires_at)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            UPDATE users
            SET reset_password_token_hash = $2, reset_password_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, UserError> {
        // Single statement: two concurrent resets with the same token cannot
        // both match.
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET reset_password_token_hash = NULL, reset_password_expires_at = NULL
            WHERE reset_password_token_hash = $1 AND reset_password_expires_at > $2 AND active
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn delete(&self, id: &UserId) -> Result<bool, UserError> {
        let result = sqlx::query(
            r#"
            DELETE FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() > 0)
    }
}
