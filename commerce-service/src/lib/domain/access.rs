//! Access control gates.
//!
//! A route declares an [`AccessPolicy`]: an ordered list of [`Gate`]s run
//! left to right. The first rejection ends evaluation, so nothing past the
//! authentication gate runs for an anonymous request.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::user::errors::SessionError;
use crate::domain::user::models::Role;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;
use crate::domain::user::models::Username;
use crate::domain::user::ports::UserServicePort;

/// The authenticated identity threaded through a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub username: Username,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Rejection produced by a gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error(transparent)]
    Unauthenticated(#[from] SessionError),

    #[error("You do not have permission to perform this action")]
    Forbidden,
}

/// One stage of a route's access pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Resolve the session token into a live principal
    Authenticate,
    /// Principal's role must be one of these
    RestrictTo(Vec<Role>),
    /// Principal must be the path-bound target user, or an admin
    SelfOrAdmin,
}

/// Ordered gate pipeline attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessPolicy {
    gates: Vec<Gate>,
}

/// Request facts the gates look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateInput<'a> {
    pub token: Option<&'a str>,
    pub target_id: Option<&'a str>,
}

/// Resolves a session token to its principal.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Principal, SessionError>;
}

#[async_trait]
impl<T> SessionResolver for T
where
    T: UserServicePort + ?Sized,
{
    async fn resolve(&self, token: &str) -> Result<Principal, SessionError> {
        self.authenticate(token)
            .await
            .map(|user| Principal::from(&user))
    }
}

impl AccessPolicy {
    pub fn new(gates: Vec<Gate>) -> Self {
        Self { gates }
    }

    /// Any logged-in principal.
    pub fn authenticated() -> Self {
        Self::new(vec![Gate::Authenticate])
    }

    /// Logged-in principal holding one of `roles`.
    pub fn restrict_to(roles: &[Role]) -> Self {
        Self::new(vec![Gate::Authenticate, Gate::RestrictTo(roles.to_vec())])
    }

    /// Logged-in principal acting on itself, or an admin.
    pub fn self_or_admin() -> Self {
        Self::new(vec![Gate::Authenticate, Gate::SelfOrAdmin])
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Run the gates in order.
    ///
    /// # Returns
    /// The authenticated principal when every gate passes
    ///
    /// # Errors
    /// * `Unauthenticated` - No token, a bad token, or a gate needing a
    ///   principal ran before authentication
    /// * `Forbidden` - Role or ownership check failed
    pub async fn evaluate<R>(
        &self,
        input: GateInput<'_>,
        sessions: &R,
    ) -> Result<Principal, AccessError>
    where
        R: SessionResolver + ?Sized,
    {
        let mut principal: Option<Principal> = None;

        for gate in &self.gates {
            match gate {
                Gate::Authenticate => {
                    let token = input.token.ok_or(SessionError::MissingToken)?;
                    principal = Some(sessions.resolve(token).await?);
                }
                Gate::RestrictTo(roles) => {
                    check_role(require(&principal)?, roles)?;
                }
                Gate::SelfOrAdmin => {
                    let target = input.target_id.unwrap_or_default();
                    ensure_self_or_admin(require(&principal)?, target)?;
                }
            }
        }

        principal.ok_or(AccessError::Unauthenticated(SessionError::MissingToken))
    }
}

fn require(principal: &Option<Principal>) -> Result<&Principal, AccessError> {
    principal
        .as_ref()
        .ok_or(AccessError::Unauthenticated(SessionError::MissingToken))
}

/// Role restriction.
pub fn check_role(principal: &Principal, allowed: &[Role]) -> Result<(), AccessError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Self-or-admin check against a raw target identifier.
pub fn ensure_self_or_admin(principal: &Principal, target_id: &str) -> Result<(), AccessError> {
    if principal.is_admin() || principal.id.to_string() == target_id {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Owner-or-admin check for records that belong to a user.
pub fn ensure_owner_or_admin(
    principal: &Principal,
    owner: Option<&UserId>,
) -> Result<(), AccessError> {
    if principal.is_admin() || owner == Some(&principal.id) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}
