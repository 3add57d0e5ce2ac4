use axum::extract::Path;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use axum_extra::extract::cookie::Cookie;
use axum_extra::extract::cookie::SameSite;
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::domain::access::Principal;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::LoginCommand;
use crate::domain::user::models::NewPassword;
use crate::domain::user::models::RegisterCommand;
use crate::domain::user::models::ResetPasswordCommand;
use crate::domain::user::models::Session;
use crate::domain::user::models::UpdatePasswordCommand;
use crate::domain::user::models::Username;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::handlers::ApiSuccess;
use crate::inbound::http::router::AppState;
use crate::inbound::http::router::SessionSettings;
use crate::user::errors::UserError;

/// Whether the client reached us over TLS, as reported by the proxy.
fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Set the session cookie and render `{status, accessToken, user}`.
pub(crate) fn session_response(
    settings: &SessionSettings,
    jar: SignedCookieJar,
    headers: &HeaderMap,
    status: StatusCode,
    session: Session,
) -> (SignedCookieJar, ApiSuccess) {
    let cookie = Cookie::build((settings.cookie_name.clone(), session.token.clone()))
        .http_only(true)
        .secure(forwarded_https(headers))
        .same_site(SameSite::Strict)
        .path("/")
        .expires(OffsetDateTime::now_utc() + time::Duration::days(settings.cookie_days))
        .build();

    let body = ApiSuccess::new(status)
        .with("accessToken", &session.token)
        .with("user", session.user.to_document());

    (jar.add(cookie), body)
}

fn new_password(
    password: Option<String>,
    confirmation: Option<String>,
) -> Result<NewPassword, UserError> {
    Ok(NewPassword::new(
        password.unwrap_or_default(),
        confirmation.unwrap_or_default(),
    )?)
}

/// HTTP request body for registration (raw JSON)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequestBody {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

impl RegisterRequestBody {
    fn try_into_command(self) -> Result<RegisterCommand, UserError> {
        Ok(RegisterCommand {
            username: Username::new(self.username.unwrap_or_default())?,
            email: EmailAddress::new(self.email.unwrap_or_default())?,
            name: self
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            password: new_password(self.password, self.password_confirm)?,
        })
    }
}

pub async fn register(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<RegisterRequestBody>, ApiError>,
) -> Result<(SignedCookieJar, ApiSuccess), ApiError> {
    let command = body.try_into_command()?;
    let session = state.users.register(command).await?;

    Ok(session_response(
        &state.session,
        jar,
        &headers,
        StatusCode::CREATED,
        session,
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequestBody {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<LoginRequestBody>, ApiError>,
) -> Result<(SignedCookieJar, ApiSuccess), ApiError> {
    let session = state
        .users
        .login(LoginCommand {
            username: body.username.unwrap_or_default(),
            password: body.password.unwrap_or_default(),
        })
        .await?;

    Ok(session_response(
        &state.session,
        jar,
        &headers,
        StatusCode::OK,
        session,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequestBody {
    pub email: Option<String>,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<ForgotPasswordRequestBody>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let proto = if forwarded_https(&headers) {
        "https"
    } else {
        "http"
    };
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let reset_url_base = format!("{}://{}/api/v1/auth/reset-password", proto, host);

    let email = state
        .users
        .forgot_password(body.email.as_deref().unwrap_or_default(), &reset_url_base)
        .await?;

    Ok(ApiSuccess::new(StatusCode::OK).with(
        "message",
        format!("Token sent to email: {}", email.as_str()),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequestBody {
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    jar: SignedCookieJar,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<ResetPasswordRequestBody>, ApiError>,
) -> Result<(SignedCookieJar, ApiSuccess), ApiError> {
    let command = ResetPasswordCommand {
        token,
        password: new_password(body.password, body.password_confirm)?,
    };
    let session = state.users.reset_password(command).await?;

    Ok(session_response(
        &state.session,
        jar,
        &headers,
        StatusCode::OK,
        session,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequestBody {
    pub password_current: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

pub async fn update_my_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    jar: SignedCookieJar,
    headers: HeaderMap,
    WithRejection(Json(body), _): WithRejection<Json<UpdatePasswordRequestBody>, ApiError>,
) -> Result<(SignedCookieJar, ApiSuccess), ApiError> {
    let command = UpdatePasswordCommand {
        current_password: body.password_current.unwrap_or_default(),
        password: new_password(body.password, body.password_confirm)?,
    };
    let session = state.users.update_password(&principal.id, command).await?;

    Ok(session_response(
        &state.session,
        jar,
        &headers,
        StatusCode::OK,
        session,
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_forwarded_https() {
        let mut headers = HeaderMap::new();
        assert!(!forwarded_https(&headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS"));
        assert!(forwarded_https(&headers));
    }

    #[test]
    fn test_register_body_requires_matching_passwords() {
        let body = RegisterRequestBody {
            username: Some("alice".to_string()),
            email: Some("alice@example.com".to_string()),
            name: Some("  ".to_string()),
            password: Some("p1".to_string()),
            password_confirm: Some("p2".to_string()),
        };

        assert!(matches!(
            body.try_into_command(),
            Err(UserError::InvalidPassword(_))
        ));
    }

    #[test]
    fn test_register_body_drops_blank_name() {
        let body = RegisterRequestBody {
            username: Some("alice".to_string()),
            email: Some("alice@example.com".to_string()),
            name: Some("  ".to_string()),
            password: Some("p1".to_string()),
            password_confirm: Some("p1".to_string()),
        };

        let command = body.try_into_command().unwrap();
        assert_eq!(command.name, None);
        assert_eq!(command.username.as_str(), "alice");
    }
}
