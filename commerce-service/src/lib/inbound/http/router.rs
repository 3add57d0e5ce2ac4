use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::extract::FromRef;
use axum::http::Request;
use axum::http::Response;
use axum::http::Uri;
use axum::middleware;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use axum::routing::MethodRouter;
use axum::Router;
use axum_extra::extract::cookie::Key;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::handlers::auth;
use super::handlers::resources;
use super::handlers::resources::ResourceHandle;
use super::handlers::users;
use super::handlers::ApiError;
use super::middleware::enforce;
use super::middleware::loggable_path;
use super::middleware::stamp_request_time;
use super::middleware::Gatekeeper;
use crate::config::CookieConfig;
use crate::domain::access::AccessPolicy;
use crate::domain::mail::ports::Mailer;
use crate::domain::resource::kinds::Cart;
use crate::domain::resource::kinds::Order;
use crate::domain::resource::kinds::Product;
use crate::domain::resource::ports::ResourceRepository;
use crate::domain::resource::service::ResourceService;
use crate::domain::user::models::Role;
use crate::domain::user::ports::UserRepository;
use crate::domain::user::ports::UserServicePort;
use crate::domain::user::service::UserService;

/// Largest accepted request body.
const BODY_LIMIT_BYTES: usize = 10 * 1024;

/// Signing key and attributes of the session cookie.
#[derive(Clone)]
pub struct SessionSettings {
    pub key: Key,
    pub cookie_name: String,
    pub cookie_days: i64,
}

impl SessionSettings {
    pub fn new(config: &CookieConfig) -> anyhow::Result<Self> {
        let key = Key::try_from(config.secret.as_bytes())
            .map_err(|e| anyhow!("Invalid cookie secret: {:?}", e))?;

        Ok(Self {
            key,
            cookie_name: config.name.clone(),
            cookie_days: config.expires_days,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserServicePort>,
    pub products: ResourceHandle<Product>,
    pub carts: ResourceHandle<Cart>,
    pub orders: ResourceHandle<Order>,
    pub session: SessionSettings,
    pub max_page_size: u32,
}

impl AppState {
    /// Wire the resource services over their stores, with the user service
    /// as the owner directory.
    pub fn new<UR, M, PR, CR, OR>(
        users: Arc<UserService<UR, M>>,
        products: Arc<PR>,
        carts: Arc<CR>,
        orders: Arc<OR>,
        session: SessionSettings,
        max_page_size: u32,
    ) -> Self
    where
        UR: UserRepository,
        M: Mailer,
        PR: ResourceRepository<Product>,
        CR: ResourceRepository<Cart>,
        OR: ResourceRepository<Order>,
    {
        let page_size = Some(max_page_size);

        Self {
            products: ResourceHandle(Arc::new(ResourceService::new(
                products,
                Arc::clone(&users),
                page_size,
            ))),
            carts: ResourceHandle(Arc::new(ResourceService::new(
                carts,
                Arc::clone(&users),
                page_size,
            ))),
            orders: ResourceHandle(Arc::new(ResourceService::new(
                orders,
                Arc::clone(&users),
                page_size,
            ))),
            users,
            session,
            max_page_size,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.session.key.clone()
    }
}

impl FromRef<AppState> for ResourceHandle<Product> {
    fn from_ref(state: &AppState) -> Self {
        state.products.clone()
    }
}

impl FromRef<AppState> for ResourceHandle<Cart> {
    fn from_ref(state: &AppState) -> Self {
        state.carts.clone()
    }
}

impl FromRef<AppState> for ResourceHandle<Order> {
    fn from_ref(state: &AppState) -> Self {
        state.orders.clone()
    }
}

/// Put `route` behind the gates of `policy`.
fn guard(
    state: &AppState,
    policy: AccessPolicy,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(
        Gatekeeper::new(state, policy),
        enforce,
    ))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("Can't find {} on this server", uri.path()))
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/forgot-password", post(auth::forgot_password))
        .route(
            "/reset-password/:token",
            post(auth::reset_password).patch(auth::reset_password),
        )
        .route(
            "/update-my-password",
            guard(
                state,
                AccessPolicy::authenticated(),
                patch(auth::update_my_password),
            ),
        )
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let admin = || AccessPolicy::restrict_to(&[Role::Admin]);

    Router::new()
        .route(
            "/me",
            guard(state, AccessPolicy::authenticated(), get(users::get_me)),
        )
        .route(
            "/update-me",
            guard(state, AccessPolicy::authenticated(), patch(users::update_me)),
        )
        .route(
            "/delete-me",
            guard(state, AccessPolicy::authenticated(), delete(users::delete_me)),
        )
        .route("/", guard(state, admin(), get(users::list_users)))
        .route(
            "/:id",
            guard(state, AccessPolicy::self_or_admin(), get(users::get_user)),
        )
        .route("/:id", guard(state, admin(), patch(users::update_user)))
        .route("/:id", guard(state, admin(), delete(users::delete_user)))
}

fn product_routes(state: &AppState) -> Router<AppState> {
    let admin = || AccessPolicy::restrict_to(&[Role::Admin]);

    Router::new()
        .route("/", get(resources::list::<Product>))
        .route("/", guard(state, admin(), post(resources::create::<Product>)))
        .route("/search", get(resources::search::<Product>))
        .route("/details/:slug", get(resources::get_by_slug::<Product>))
        .route("/:id", get(resources::get::<Product>))
        .route(
            "/:id",
            guard(state, admin(), patch(resources::update::<Product>)),
        )
        .route(
            "/:id",
            guard(state, admin(), delete(resources::delete::<Product>)),
        )
}

fn cart_routes(state: &AppState) -> Router<AppState> {
    let admin = || AccessPolicy::restrict_to(&[Role::Admin]);
    let session = AccessPolicy::authenticated;

    Router::new()
        .route("/", guard(state, admin(), get(resources::list::<Cart>)))
        .route("/", guard(state, session(), post(resources::create::<Cart>)))
        .route(
            "/my-cart",
            guard(state, session(), get(resources::list_mine::<Cart>)),
        )
        .route(
            "/:id",
            guard(
                state,
                session(),
                get(resources::get::<Cart>)
                    .patch(resources::update::<Cart>)
                    .delete(resources::delete::<Cart>),
            ),
        )
}

fn order_routes(state: &AppState) -> Router<AppState> {
    let admin = || AccessPolicy::restrict_to(&[Role::Admin]);
    let session = AccessPolicy::authenticated;

    Router::new()
        .route("/", guard(state, admin(), get(resources::list::<Order>)))
        .route("/", guard(state, session(), post(resources::create::<Order>)))
        .route(
            "/my-orders",
            guard(state, session(), get(resources::list_mine::<Order>)),
        )
        .route(
            "/:id",
            guard(
                state,
                session(),
                get(resources::get::<Order>).delete(resources::delete::<Order>),
            ),
        )
        .route(
            "/:id",
            guard(state, admin(), patch(resources::update::<Order>)),
        )
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/auth", auth_routes(&state))
        .nest("/users", user_routes(&state))
        .nest("/products", product_routes(&state))
        .nest("/carts", cart_routes(&state))
        .nest("/orders", order_routes(&state));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %loggable_path(request.uri().path()),
                version = ?request.version(),
            )
        })
        .on_request(|request: &Request<Body>, _span: &Span| {
            tracing::info!(
                method = %request.method(),
                path = %loggable_path(request.uri().path()),
                "Request started"
            );
        })
        .on_response(
            |response: &Response<Body>, latency: Duration, _span: &Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "Request completed"
                );
            },
        );

    Router::new()
        .nest("/api/v1", api)
        .fallback(not_found)
        .layer(middleware::from_fn(stamp_request_time))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use ::auth::Authenticator;
    use axum::body::to_bytes;
    use chrono::Duration;
    use http::header;
    use http::StatusCode;
    use serde_json::Value;
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::outbound::mail::LogMailer;
    use crate::outbound::repositories::InMemoryDocumentRepository;
    use crate::outbound::repositories::InMemoryUserRepository;

    fn router() -> Router {
        let authenticator = Arc::new(Authenticator::new(
            b"router-test-secret",
            Duration::days(1),
            Duration::minutes(10),
        ));
        let users = Arc::new(UserService::new(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(LogMailer::new("no-reply@commerce.local", "localhost")),
            authenticator,
        ));
        let session = SessionSettings::new(&CookieConfig {
            secret: "s".repeat(64),
            name: "jwt".to_string(),
            expires_days: 1,
        })
        .unwrap();

        create_router(AppState::new(
            users,
            Arc::new(InMemoryDocumentRepository::<Product>::new()),
            Arc::new(InMemoryDocumentRepository::<Cart>::new()),
            Arc::new(InMemoryDocumentRepository::<Order>::new()),
            session,
            1000,
        ))
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Log output collected in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_short_cookie_secret_rejected() {
        let result = SessionSettings::new(&CookieConfig {
            secret: "short".to_string(),
            name: "jwt".to_string(),
            expires_days: 1,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unmatched_route_echoes_path() {
        let request = Request::builder()
            .uri("/api/v2/products")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "Can't find /api/v2/products on this server");
    }

    #[tokio::test]
    async fn test_gate_runs_before_handler() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/products")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not even json"))
            .unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_public_listing_envelope() {
        let request = Request::builder()
            .uri("/api/v1/products?sort=-price")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"], 0);
        assert!(body["products"].as_array().unwrap().is_empty());
        assert!(body["requestedAt"].is_string());
    }

    #[tokio::test]
    async fn test_reset_token_kept_out_of_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let token = "9f86d081884c7d659a2feaa0c55ad015".repeat(2);
        let request = Request::builder()
            .method("PATCH")
            .uri(format!("/api/v1/auth/reset-password/{}?via=email", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"password":"pass_word!","passwordConfirm":"pass_word!"}"#,
            ))
            .unwrap();

        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");

        let logs = logs.contents();
        assert!(logs.contains("/api/v1/auth/reset-password/:token"));
        assert!(logs.contains("Request completed"));
        assert!(!logs.contains(&token));
    }

    #[tokio::test]
    async fn test_invalid_filter_is_bad_request() {
        let request = Request::builder()
            .uri("/api/v1/products?price[between]=1")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
    }
}
