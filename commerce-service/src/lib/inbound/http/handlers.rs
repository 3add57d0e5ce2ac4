use axum::extract::rejection::JsonRejection;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::domain::access::AccessError;
use crate::domain::resource::errors::QueryError;
use crate::domain::resource::errors::ResourceError;
use crate::user::errors::SessionError;
use crate::user::errors::UserError;

pub mod auth;
pub mod resources;
pub mod users;

/// Message shown to clients for every server-side failure.
const INTERNAL_MESSAGE: &str = "Something went very wrong!";

/// Successful JSON response: `{"status": "success", ...}`.
#[derive(Debug, Clone)]
pub struct ApiSuccess(StatusCode, Json<Value>);

impl ApiSuccess {
    pub fn new(status: StatusCode) -> Self {
        let mut body = Map::new();
        body.insert("status".to_string(), Value::String("success".to_string()));
        ApiSuccess(status, Json(Value::Object(body)))
    }

    /// Add a payload entry under `key`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Value::Object(body) = &mut self.1 .0 {
            let value = serde_json::to_value(value).unwrap_or(Value::Null);
            body.insert(key.to_string(), value);
        }
        self
    }

    /// List envelope: the records under `key`, their count and the request
    /// time.
    pub fn list(key: &str, records: Vec<Value>, requested_at: DateTime<Utc>) -> Self {
        Self::new(StatusCode::OK)
            .with(
                "requestedAt",
                requested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with("counts", records.len())
            .with(key, records)
    }

    pub fn status(&self) -> StatusCode {
        self.0
    }

    pub fn body(&self) -> &Value {
        &self.1 .0
    }
}

impl IntoResponse for ApiSuccess {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

/// Central error reporter: one variant per failure kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// `message` goes to the client, `detail` only to the log
    Internal { message: String, detail: String },
}

impl ApiError {
    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal {
            message: INTERNAL_MESSAGE.to_string(),
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthenticated(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => msg,
            ApiError::Internal { message, detail } => {
                tracing::error!(error = %detail, "Request failed");
                message
            }
        };

        (status, Json(ApiErrorBody::new(status, message))).into_response()
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::InvalidUserId(_)
            | UserError::InvalidUsername(_)
            | UserError::InvalidEmail(_)
            | UserError::InvalidRole(_)
            | UserError::InvalidPassword(_)
            | UserError::MissingInput(_)
            | UserError::PasswordUpdateNotAllowed
            | UserError::InvalidResetToken
            | UserError::UsernameAlreadyExists(_)
            | UserError::EmailAlreadyExists(_) => ApiError::BadRequest(err.to_string()),
            UserError::IncorrectCredentials | UserError::IncorrectCurrentPassword => {
                ApiError::Unauthenticated(err.to_string())
            }
            UserError::Session(session) => ApiError::from(session),
            UserError::NotFound(_) | UserError::NotFoundByEmail(_) => {
                ApiError::NotFound(err.to_string())
            }
            UserError::MailDelivery(_) => ApiError::Internal {
                message: "There was an error sending the email. Try again later!".to_string(),
                detail: err.to_string(),
            },
            UserError::Password(_)
            | UserError::Token(_)
            | UserError::DatabaseError(_)
            | UserError::Unknown(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(_) => ApiError::internal(err.to_string()),
            _ => ApiError::Unauthenticated(err.to_string()),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated(session) => ApiError::from(session),
            AccessError::Forbidden => ApiError::Forbidden(err.to_string()),
        }
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::InvalidId(_)
            | ResourceError::InvalidQuery(_)
            | ResourceError::Validation { .. }
            | ResourceError::DuplicateSlug { .. } => ApiError::BadRequest(err.to_string()),
            ResourceError::NotFound { .. } | ResourceError::NotFoundBySlug { .. } => {
                ApiError::NotFound(err.to_string())
            }
            ResourceError::VersionConflict { .. } => ApiError::Conflict(err.to_string()),
            ResourceError::OwnerLookup(_)
            | ResourceError::DatabaseError(_)
            | ResourceError::Unknown(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::from(ResourceError::from(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Error envelope: `fail` for client errors, `error` for server errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl ApiErrorBody {
    pub fn new(status_code: StatusCode, message: String) -> Self {
        Self {
            status: if status_code.is_server_error() {
                "error"
            } else {
                "fail"
            },
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::errors::MailError;

    #[test]
    fn test_kinds_map_to_status_codes() {
        assert_eq!(
            ApiError::from(UserError::IncorrectCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(UserError::InvalidResetToken).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AccessError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(ResourceError::NotFound {
                kind: "product",
                id: "x".to_string()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(UserError::Session(SessionError::Revoked)).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_internal_detail_hidden_from_client() {
        let err = ApiError::from(UserError::DatabaseError("connection refused".to_string()));
        match &err {
            ApiError::Internal { message, detail } => {
                assert_eq!(message, INTERNAL_MESSAGE);
                assert!(detail.contains("connection refused"));
            }
            other => panic!("expected internal error, got {:?}", other),
        }

        let mail = ApiError::from(UserError::MailDelivery(MailError::DeliveryFailed(
            "relay down".to_string(),
        )));
        assert!(matches!(mail, ApiError::Internal { ref message, .. } if !message.contains("relay")));
    }

    #[test]
    fn test_error_envelope() {
        let fail = ApiErrorBody::new(StatusCode::NOT_FOUND, "gone".to_string());
        assert_eq!(fail.status, "fail");
        let error = ApiErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "oops".to_string());
        assert_eq!(error.status, "error");
    }

    #[test]
    fn test_list_envelope() {
        let at = Utc::now();
        let success = ApiSuccess::list("products", vec![json!({"title": "Lamp"})], at);

        assert_eq!(success.status(), StatusCode::OK);
        assert_eq!(success.body()["status"], "success");
        assert_eq!(success.body()["counts"], 1);
        assert_eq!(success.body()["products"][0]["title"], "Lamp");
        assert!(success.body()["requestedAt"].is_string());
    }
}
