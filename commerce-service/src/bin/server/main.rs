use std::sync::Arc;

use auth::Authenticator;
use chrono::Duration;
use commerce_service::config::Config;
use commerce_service::config::StoreBackend;
use commerce_service::domain::resource::kinds::Cart;
use commerce_service::domain::resource::kinds::Order;
use commerce_service::domain::resource::kinds::Product;
use commerce_service::domain::user::service::UserService;
use commerce_service::inbound::http::router::create_router;
use commerce_service::inbound::http::router::AppState;
use commerce_service::inbound::http::router::SessionSettings;
use commerce_service::outbound::mail::LogMailer;
use commerce_service::outbound::repositories::InMemoryDocumentRepository;
use commerce_service::outbound::repositories::InMemoryUserRepository;
use commerce_service::outbound::repositories::PostgresDocumentRepository;
use commerce_service::outbound::repositories::PostgresUserRepository;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commerce_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        service = "commerce-service",
        version = env!("CARGO_PKG_VERSION"),
        "Service starting"
    );

    let config = Config::load()?;

    tracing::info!(
        http_port = config.server.http_port,
        store = ?config.store.backend,
        session_days = config.jwt.expiration_days,
        reset_ttl_minutes = config.password_reset.ttl_minutes,
        max_page_size = config.query.max_page_size,
        "Configuration loaded"
    );

    let authenticator = Arc::new(Authenticator::new(
        config.jwt.secret.as_bytes(),
        Duration::days(config.jwt.expiration_days),
        Duration::minutes(config.password_reset.ttl_minutes),
    ));
    let mailer = Arc::new(LogMailer::new(
        config.mail.from.clone(),
        config.mail.host.clone(),
    ));
    let session = SessionSettings::new(&config.cookie)?;
    let max_page_size = config.query.max_page_size;

    let state = match config.store.backend {
        StoreBackend::Postgres => {
            let pg_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database.url)
                .await?;
            tracing::info!(
                max_connections = config.database.max_connections,
                database = "postgresql",
                "Database connection pool created"
            );

            sqlx::migrate!("./migrations").run(&pg_pool).await?;
            tracing::info!(database = "postgresql", "Database migrations completed");

            let user_repository = Arc::new(PostgresUserRepository::new(pg_pool.clone()));
            let user_service = Arc::new(UserService::new(user_repository, mailer, authenticator));

            AppState::new(
                user_service,
                Arc::new(PostgresDocumentRepository::<Product>::new(pg_pool.clone())),
                Arc::new(PostgresDocumentRepository::<Cart>::new(pg_pool.clone())),
                Arc::new(PostgresDocumentRepository::<Order>::new(pg_pool)),
                session,
                max_page_size,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on shutdown");

            let user_repository = Arc::new(InMemoryUserRepository::new());
            let user_service = Arc::new(UserService::new(user_repository, mailer, authenticator));

            AppState::new(
                user_service,
                Arc::new(InMemoryDocumentRepository::<Product>::new()),
                Arc::new(InMemoryDocumentRepository::<Cart>::new()),
                Arc::new(InMemoryDocumentRepository::<Order>::new()),
                session,
                max_page_size,
            )
        }
    };

    let http_address = format!("0.0.0.0:{}", config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_address).await?;
    tracing::info!(
        address = %http_address,
        port = config.server.http_port,
        protocol = "http",
        "Http server listening"
    );

    axum::serve(http_listener, create_router(state)).await?;
    tracing::info!("Server exited");

    Ok(())
}
