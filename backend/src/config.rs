use std::env;

use thiserror::Error;

/// Fallback signing secret used only when running in `Env::Local`.
pub const LOCAL_JWT_SECRET: &str = "khana-pina-local-development-secret";

/// Default origin of the ordering frontend (Vite dev server).
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Longest accepted token lifetime: one year.
pub const MAX_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded and
/// pulled into handlers and extractors via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Postgres connection string. `None` (local only) selects the in-memory store.
    pub db_url: Option<String>,
    /// Shared secret used to sign and verify identity tokens.
    pub jwt_secret: String,
    /// Lifetime of an issued token, in seconds.
    pub token_ttl_secs: i64,
    /// TCP port the HTTP server listens on.
    pub port: u16,
    /// Allowed CORS origin. `*` allows any origin.
    pub cors_origin: String,
    /// Runtime environment marker. Controls log format and which settings are mandatory.
    pub env: Env,
}

/// Env
///
/// Runtime context. Production demands every secret explicitly; local mode fills
/// in development defaults.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl Default for AppConfig {
    /// Safe, non-panicking configuration used for test state scaffolding.
    fn default() -> Self {
        Self {
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            port: DEFAULT_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            env: Env::Local,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads all parameters from environment variables. Fails fast when a value
    /// required by the current environment is missing or unparsable, so the
    /// server never starts with an incomplete configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = env::var("DB_URI")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .filter(|url| !url.is_empty());
        if env == Env::Production && db_url.is_none() {
            return Err(ConfigError::Missing("DB_URI"));
        }

        let jwt_secret = match (env::var("JWT_SECRET"), &env) {
            (Ok(secret), _) if !secret.is_empty() => secret,
            (_, Env::Production) => return Err(ConfigError::Missing("JWT_SECRET")),
            (_, Env::Local) => LOCAL_JWT_SECRET.to_string(),
        };

        let token_ttl_secs = parse_var("JWT_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?;
        if !(1..=MAX_TOKEN_TTL_SECS).contains(&token_ttl_secs) {
            return Err(ConfigError::Invalid {
                name: "JWT_TTL_SECS",
                value: token_ttl_secs.to_string(),
            });
        }

        Ok(Self {
            db_url,
            jwt_secret,
            token_ttl_secs,
            port: parse_var("PORT", DEFAULT_PORT)?,
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string()),
            env,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
