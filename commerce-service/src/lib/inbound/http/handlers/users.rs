use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::Value;

use super::auth::session_response;
use crate::domain::access::Principal;
use crate::domain::resource::query::QueryDescriptor;
use crate::domain::resource::query::QueryOptions;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::Role;
use crate::domain::user::models::UpdateProfileCommand;
use crate::domain::user::models::UpdateUserCommand;
use crate::domain::user::models::UserId;
use crate::domain::user::models::Username;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::handlers::ApiSuccess;
use crate::inbound::http::middleware::RequestedAt;
use crate::inbound::http::router::AppState;
use crate::user::errors::UserError;

/// Listing order when the query names none.
const DEFAULT_USER_SORT: &str = "-createdAt";

pub async fn get_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<ApiSuccess, ApiError> {
    let user = state.users.get_user(&principal.id).await?;
    Ok(ApiSuccess::new(StatusCode::OK).with("user", user.to_document()))
}

/// HTTP request body for a self-service profile edit (raw JSON).
///
/// Password fields are captured only to be refused; anything else outside
/// the profile whitelist is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequestBody {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<Value>,
    pub password_confirm: Option<Value>,
}

impl UpdateMeRequestBody {
    fn try_into_command(self) -> Result<UpdateProfileCommand, UserError> {
        if self.password.is_some() || self.password_confirm.is_some() {
            return Err(UserError::PasswordUpdateNotAllowed);
        }

        Ok(UpdateProfileCommand {
            name: self.name,
            username: self.username.map(Username::new).transpose()?,
            email: self.email.map(EmailAddress::new).transpose()?,
        })
    }
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    jar: SignedCookieJar,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<UpdateMeRequestBody>, ApiError>,
) -> Result<(SignedCookieJar, ApiSuccess), ApiError> {
    let command = body.try_into_command()?;
    let session = state.users.update_profile(&principal.id, command).await?;

    Ok(session_response(
        &state.session,
        jar,
        &headers,
        StatusCode::OK,
        session,
    ))
}

pub async fn delete_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, ApiError> {
    state.users.deactivate(&principal.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(RequestedAt(requested_at)): Extension<RequestedAt>,
    WithRejection(Query(descriptor), _): WithRejection<Query<QueryDescriptor>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let spec = QuerySpec::from_descriptor(
        &descriptor,
        &QueryOptions {
            default_sort: Some(DEFAULT_USER_SORT),
            max_page_size: Some(state.max_page_size),
        },
    )?;

    let users: Vec<Value> = state
        .users
        .list_users(&spec)
        .await?
        .iter()
        .map(|user| spec.projection.apply(user.to_document()))
        .collect();

    Ok(ApiSuccess::list("users", users, requested_at))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiSuccess, ApiError> {
    let user_id = UserId::from_string(&id).map_err(UserError::from)?;
    let user = state.users.get_user(&user_id).await?;

    Ok(ApiSuccess::new(StatusCode::OK).with("user", user.to_document()))
}

/// HTTP request body for an administrative user edit (raw JSON)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequestBody {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub password: Option<Value>,
    pub password_confirm: Option<Value>,
}

impl UpdateUserRequestBody {
    fn try_into_command(self) -> Result<UpdateUserCommand, UserError> {
        if self.password.is_some() || self.password_confirm.is_some() {
            return Err(UserError::PasswordUpdateNotAllowed);
        }

        Ok(UpdateUserCommand {
            name: self.name,
            username: self.username.map(Username::new).transpose()?,
            email: self.email.map(EmailAddress::new).transpose()?,
            role: self.role.map(|role| role.parse::<Role>()).transpose()?,
        })
    }
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<UpdateUserRequestBody>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let user_id = UserId::from_string(&id).map_err(UserError::from)?;
    let command = body.try_into_command()?;
    let user = state.users.update_user(&user_id, command).await?;

    Ok(ApiSuccess::new(StatusCode::OK).with("user", user.to_document()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = UserId::from_string(&id).map_err(UserError::from)?;
    state.users.delete_user(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_update_me_refuses_password_fields() {
        let body: UpdateMeRequestBody =
            serde_json::from_value(json!({"name": "Al", "passwordConfirm": "x"})).unwrap();
        assert!(matches!(
            body.try_into_command(),
            Err(UserError::PasswordUpdateNotAllowed)
        ));
    }

    #[test]
    fn test_update_me_ignores_fields_outside_whitelist() {
        let body: UpdateMeRequestBody =
            serde_json::from_value(json!({"name": "Al", "role": "admin", "active": false}))
                .unwrap();

        let command = body.try_into_command().unwrap();
        assert_eq!(command.name.as_deref(), Some("Al"));
        assert!(command.username.is_none());
        assert!(command.email.is_none());
    }

    #[test]
    fn test_update_user_rejects_unknown_role() {
        let body: UpdateUserRequestBody =
            serde_json::from_value(json!({"role": "root"})).unwrap();
        assert!(matches!(
            body.try_into_command(),
            Err(UserError::InvalidRole(_))
        ));
    }
}
