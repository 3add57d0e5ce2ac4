use std::sync::Arc;

use async_trait::async_trait;
use auth::Authenticator;
use chrono::Duration;
use commerce_service::config::CookieConfig;
use commerce_service::domain::errors::MailError;
use commerce_service::domain::mail::models::EmailMessage;
use commerce_service::domain::mail::ports::Mailer;
use commerce_service::domain::resource::kinds::Cart;
use commerce_service::domain::resource::kinds::Order;
use commerce_service::domain::resource::kinds::Product;
use commerce_service::domain::user::models::Role;
use commerce_service::domain::user::models::UserChanges;
use commerce_service::domain::user::ports::UserRepository;
use commerce_service::domain::user::service::UserService;
use commerce_service::inbound::http::router::create_router;
use commerce_service::inbound::http::router::AppState;
use commerce_service::inbound::http::router::SessionSettings;
use commerce_service::outbound::repositories::InMemoryDocumentRepository;
use commerce_service::outbound::repositories::InMemoryUserRepository;
use serde_json::json;
use serde_json::Value;
use tokio::sync::Mutex;

pub const PASSWORD: &str = "pass_word!";

/// Mailer that keeps every message for inspection.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

impl RecordingMailer {
    /// Reset URL from the most recent message.
    pub async fn last_reset_url(&self) -> Option<String> {
        let sent = self.sent.lock().await;
        let message = sent.last()?;
        message
            .text
            .split_whitespace()
            .find(|word| word.starts_with("http"))
            .map(str::to_string)
    }
}

/// Test application that spawns a real server over in-memory stores
pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    pub users: Arc<InMemoryUserRepository>,
    pub mailer: Arc<RecordingMailer>,
}

/// Credentials and token of a registered user.
pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

impl TestApp {
    /// Spawn the application in a background task and return TestApp
    pub async fn spawn() -> Self {
        // Use random port (0 = OS assigns)
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let address = format!("http://127.0.0.1:{}", port);

        let users = Arc::new(InMemoryUserRepository::new());
        let mailer = Arc::new(RecordingMailer::default());
        let authenticator = Arc::new(Authenticator::new(
            b"test-secret-key-for-jwt-signing-at-least-32-bytes",
            Duration::days(90),
            Duration::minutes(10),
        ));
        let user_service = Arc::new(UserService::new(
            Arc::clone(&users),
            Arc::clone(&mailer),
            authenticator,
        ));

        let session = SessionSettings::new(&CookieConfig {
            secret: "k".repeat(64),
            name: "jwt".to_string(),
            expires_days: 90,
        })
        .expect("Failed to build session settings");

        let state = AppState::new(
            user_service,
            Arc::new(InMemoryDocumentRepository::<Product>::new()),
            Arc::new(InMemoryDocumentRepository::<Cart>::new()),
            Arc::new(InMemoryDocumentRepository::<Order>::new()),
            session,
            1000,
        );
        let router = create_router(state);

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server error");
        });

        Self {
            address,
            api_client: reqwest::Client::builder()
                .build()
                .expect("Failed to create reqwest client"),
            users,
            mailer,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Helper to make GET request
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.get(self.url(path))
    }

    /// Helper to make POST request
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.post(self.url(path))
    }

    /// Helper to make PATCH request
    pub fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.patch(self.url(path))
    }

    /// Helper to make GET request with Bearer token
    pub fn get_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.get(path).bearer_auth(token)
    }

    /// Helper to make POST request with Bearer token
    pub fn post_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.post(path).bearer_auth(token)
    }

    /// Helper to make PATCH request with Bearer token
    pub fn patch_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.patch(path).bearer_auth(token)
    }

    /// Helper to make DELETE request with Bearer token
    pub fn delete_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.api_client.delete(self.url(path)).bearer_auth(token)
    }

    /// Register a user through the API.
    pub async fn register(&self, username: &str) -> TestUser {
        let response = self
            .post("/api/v1/auth/register")
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
                "passwordConfirm": PASSWORD,
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let body: Value = response.json().await.expect("Failed to parse response");
        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            username: username.to_string(),
            token: body["accessToken"].as_str().unwrap().to_string(),
        }
    }

    /// Register a user and promote it to admin directly in the store.
    pub async fn register_admin(&self, username: &str) -> TestUser {
        let admin = self.register(username).await;

        let user = self
            .users
            .find_by_username(username)
            .await
            .unwrap()
            .expect("registered user missing");
        let changes = UserChanges {
            role: Some(Role::Admin),
            ..Default::default()
        };
        self.users.update_fields(&user.id, &changes).await.unwrap();

        admin
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.post("/api/v1/auth/login")
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
