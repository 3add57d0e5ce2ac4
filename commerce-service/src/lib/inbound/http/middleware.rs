use std::sync::Arc;

use axum::extract::RawPathParams;
use axum::extract::Request;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::Key;
use axum_extra::extract::SignedCookieJar;
use chrono::DateTime;
use chrono::Utc;

use crate::domain::access::AccessPolicy;
use crate::domain::access::GateInput;
use crate::domain::user::ports::UserServicePort;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::router::AppState;

/// Path parameter naming the target user of self-or-admin routes.
const TARGET_PARAM: &str = "id";

/// Path segment whose successor is a plaintext reset token.
const TOKEN_BEARING_SEGMENT: &str = "reset-password";

/// Request path as it may appear in logs: reset tokens are masked and the
/// query string is not included.
pub fn loggable_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let shown = if previous == TOKEN_BEARING_SEGMENT && !segment.is_empty() {
                ":token"
            } else {
                segment
            };
            previous = segment;
            shown
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Time the request entered the application, attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestedAt(pub DateTime<Utc>);

pub async fn stamp_request_time(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(RequestedAt(Utc::now()));
    next.run(req).await
}

/// State of the access middleware: one gatekeeper per guarded route.
#[derive(Clone)]
pub struct Gatekeeper {
    users: Arc<dyn UserServicePort>,
    key: Key,
    cookie_name: String,
    policy: Arc<AccessPolicy>,
}

impl Gatekeeper {
    pub fn new(state: &AppState, policy: AccessPolicy) -> Self {
        Self {
            users: Arc::clone(&state.users),
            key: state.session.key.clone(),
            cookie_name: state.session.cookie_name.clone(),
            policy: Arc::new(policy),
        }
    }
}

/// Middleware that runs the route's access policy and adds the principal
/// to request extensions
pub async fn enforce(
    State(gatekeeper): State<Gatekeeper>,
    params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Bearer header wins over the session cookie
    let token = extract_token_from_header(req.headers())
        .map(str::to_string)
        .or_else(|| {
            SignedCookieJar::from_headers(req.headers(), gatekeeper.key.clone())
                .get(&gatekeeper.cookie_name)
                .map(|cookie| cookie.value().to_string())
        });

    let target_id = params.and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == TARGET_PARAM)
            .map(|(_, value)| value.to_string())
    });

    let input = GateInput {
        token: token.as_deref(),
        target_id: target_id.as_deref(),
    };
    let principal = gatekeeper
        .policy
        .evaluate(input, gatekeeper.users.as_ref())
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, path = %loggable_path(req.uri().path()), "Access denied");
            ApiError::from(e)
        })?;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Token from an `Authorization: Bearer <token>` header, if present.
fn extract_token_from_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
