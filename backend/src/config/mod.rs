//! Application configuration management

use std::env;

use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite database URL
    pub database_url: String,

    pub auth: AuthConfig,

    pub pagination: PaginationConfig,

    /// Allowed browser origin; any origin when unset
    pub cors_origin: Option<String>,

    /// Asset storage API base URL; deletions are skipped when unset
    pub storage_url: Option<String>,

    /// Asset storage API key
    pub storage_key: Option<String>,
}

/// Token signing and cookie settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    /// Short-lived token lifetime in seconds
    pub access_token_expiry: i64,
    /// Long-lived token lifetime in seconds
    pub refresh_token_expiry: i64,
    pub bcrypt_cost: u32,
    /// Mark credential cookies `Secure`
    pub cookie_secure: bool,
}

impl AuthConfig {
    /// Fast hashing and fixed secrets, for tests
    pub fn for_tests() -> Self {
        Self {
            access_token_secret: "test-access-secret".to_string(),
            refresh_token_secret: "test-refresh-secret".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
            bcrypt_cost: 4,
            cookie_secure: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

fn dev_secret(name: &str) -> String {
    tracing::warn!(
        "{} is not set; using a random secret. Tokens will not survive a restart.",
        name
    );
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let auth = AuthConfig {
            access_token_secret: env::var("ACCESS_TOKEN_SECRET")
                .unwrap_or_else(|_| dev_secret("ACCESS_TOKEN_SECRET")),
            refresh_token_secret: env::var("REFRESH_TOKEN_SECRET")
                .unwrap_or_else(|_| dev_secret("REFRESH_TOKEN_SECRET")),
            access_token_expiry: parse_var("ACCESS_TOKEN_EXPIRY", 86_400)?,
            refresh_token_expiry: parse_var("REFRESH_TOKEN_EXPIRY", 864_000)?,
            bcrypt_cost: parse_var("BCRYPT_COST", 10)?,
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        };

        let pagination = PaginationConfig {
            default_page_size: parse_var("DEFAULT_PAGE_SIZE", 10)?,
            max_page_size: parse_var("MAX_PAGE_SIZE", 100)?,
        };
        if pagination.default_page_size == 0 || pagination.default_page_size > pagination.max_page_size {
            anyhow::bail!("DEFAULT_PAGE_SIZE must be between 1 and MAX_PAGE_SIZE");
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: parse_var("PORT", 8000)?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/vidhub.db".to_string()),

            auth,
            pagination,

            cors_origin: env::var("CORS_ORIGIN").ok(),

            storage_url: env::var("STORAGE_URL").ok(),

            storage_key: env::var("STORAGE_KEY").ok(),
        })
    }
}
