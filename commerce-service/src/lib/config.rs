use std::env;

use config::Config as ConfigBuilder;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

/// Minimum length of the cookie signing key, in bytes.
const MIN_COOKIE_SECRET_BYTES: usize = 64;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub jwt: JwtConfig,
    pub cookie: CookieConfig,
    pub password_reset: PasswordResetConfig,
    pub mail: MailConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieConfig {
    pub secret: String,
    pub name: String,
    pub expires_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PasswordResetConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub from: String,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    pub max_page_size: u32,
}

impl Config {
    /// Load configuration from files with environment variable overrides
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (JWT__SECRET, DATABASE__URL, etc.)
    /// 2. Environment-specific config file (config/{environment}.toml)
    /// 3. Default config file (config/default.toml)
    ///
    /// Missing secrets fail the load.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let configuration = ConfigBuilder::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Layer on environment-specific configuration
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Layer on environment variables (with __ as separator)
            // Example: DATABASE__URL=postgres://... overrides database.url
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()?;

        let config: Config = configuration.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the service cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Message("jwt.secret must be set".to_string()));
        }
        if self.cookie.secret.len() < MIN_COOKIE_SECRET_BYTES {
            return Err(ConfigError::Message(format!(
                "cookie.secret must be at least {} bytes",
                MIN_COOKIE_SECRET_BYTES
            )));
        }
        if self.jwt.expiration_days <= 0 || self.cookie.expires_days <= 0 {
            return Err(ConfigError::Message(
                "session lifetimes must be positive".to_string(),
            ));
        }
        if self.password_reset.ttl_minutes <= 0 {
            return Err(ConfigError::Message(
                "password_reset.ttl_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
