use std::env;

use thiserror::Error;

/// Fallback signing secret for local development only.
pub const LOCAL_JWT_SECRET: &str = "shareline-local-development-secret";
/// Local development store: a SQLite file created on first start.
pub const LOCAL_DATABASE_URL: &str = "sqlite://shareline.db?mode=rwc";
/// Tokens live for 8 hours unless overridden.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 60 * 60 * 8;
/// Upper bound for `TOKEN_TTL_SECS`: 30 days.
pub const MAX_TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 30;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded and
/// pulled into handlers through `FromRef`, so no component reads the environment
/// on its own.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Database connection string (SQLite).
    pub db_url: String,
    // Runtime environment marker. Controls the local auth bypass and log format.
    pub env: Env,
    // Secret used to sign and validate bearer tokens (HS256).
    pub jwt_secret: String,
    // Lifetime of issued tokens, in seconds.
    pub token_ttl_secs: i64,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
    // Accept the `x-user-id` header as identity. Only honoured in `Env::Local`
    // and only when `AUTH_BYPASS=true` is set explicitly.
    pub auth_bypass: bool,
}

/// Env
///
/// Defines the runtime context: local development with conveniences, or a
/// production deployment where every secret must be provided explicitly.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// ConfigError
///
/// Raised by `AppConfig::load` when the environment is incomplete or malformed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    MissingVar(&'static str),

    #[error("{name} is not a valid value: {value}")]
    InvalidVar { name: &'static str, value: String },
}

impl Default for AppConfig {
    /// Safe, non-panicking values for test setup. Uses an in-memory store.
    fn default() -> Self {
        Self {
            db_url: "sqlite::memory:".to_string(),
            env: Env::Local,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            bind_addr: "127.0.0.1:0".to_string(),
            auth_bypass: false,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads all parameters from environment variables at startup.
    ///
    /// Local runs fall back to a file-backed SQLite store and a development
    /// signing secret. Production requires `DATABASE_URL` and `JWT_SECRET`.
    /// `TOKEN_TTL_SECS` must lie in `1..=MAX_TOKEN_TTL_SECS`.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let (db_url, jwt_secret) = match env {
            Env::Production => (
                env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?,
                env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET"))?,
            ),
            Env::Local => (
                env::var("DATABASE_URL").unwrap_or_else(|_| LOCAL_DATABASE_URL.to_string()),
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let token_ttl_secs = match env::var("TOKEN_TTL_SECS") {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(secs) if secs > 0 && secs <= MAX_TOKEN_TTL_SECS => secs,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "TOKEN_TTL_SECS",
                        value: raw,
                    });
                }
            },
            Err(_) => DEFAULT_TOKEN_TTL_SECS,
        };

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        // Never enabled in production, whatever the variable says.
        let auth_bypass = env == Env::Local
            && matches!(env::var("AUTH_BYPASS").as_deref(), Ok("true") | Ok("1"));

        Ok(Self {
            db_url,
            env,
            jwt_secret,
            token_ttl_secs,
            bind_addr,
            auth_bypass,
        })
    }
}
