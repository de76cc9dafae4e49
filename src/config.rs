//! Application configuration parsed from environment variables.
//!
//! Parsing goes through a lookup function so tests can feed a map instead
//! of mutating the process environment.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use crate::services::auth::{AuthCapabilities, AuthOptions, Credentials};

pub const DEFAULT_SITE_URL: &str = "http://localhost:5173";
pub const DEFAULT_REDIRECT_PROVIDER: &str = "google";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

impl crate::error::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Rest,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Hosted backend endpoint and project key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub timeouts: HttpTimeouts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub store_mode: StoreMode,
    /// Present for `rest` and `postgres` modes; sessions always go through it.
    pub backend: Option<BackendConfig>,
    /// Present for `postgres` mode only.
    pub database: Option<DatabaseConfig>,
    pub auth: AuthOptions,
    /// Account the binary signs in with at startup, if any.
    pub sign_in: Option<Credentials>,
}

impl AppConfig {
    /// Build config from the process environment.
    ///
    /// Required:
    /// - `BACKEND_URL` unless `STORE_MODE=memory`
    /// - `DATABASE_URL` when `STORE_MODE=postgres`
    ///
    /// Optional:
    /// - `STORE_MODE`: `rest` (default), `postgres`, `memory`
    /// - `BACKEND_ANON_KEY`: project key sent with every request
    /// - `SITE_URL`: default `http://localhost:5173`
    /// - `AUTH_CAPABILITIES`: comma list of `password`, `redirect` (default both)
    /// - `AUTH_REDIRECT_PROVIDER`: default `google`
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `HTTP_REQUEST_TIMEOUT_SECS`: default 30
    /// - `HTTP_CONNECT_TIMEOUT_SECS`: default 10
    /// - `SIGN_IN_EMAIL` + `SIGN_IN_PASSWORD`: startup account
    ///
    /// # Errors
    ///
    /// Returns an error for a missing required variable or an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let store_mode = parse_store_mode(get("STORE_MODE").as_deref())?;

        let timeouts = HttpTimeouts {
            request_secs: parse_or("HTTP_REQUEST_TIMEOUT_SECS", get("HTTP_REQUEST_TIMEOUT_SECS"), DEFAULT_HTTP_REQUEST_TIMEOUT_SECS)?,
            connect_secs: parse_or("HTTP_CONNECT_TIMEOUT_SECS", get("HTTP_CONNECT_TIMEOUT_SECS"), DEFAULT_HTTP_CONNECT_TIMEOUT_SECS)?,
        };
        let backend = match (store_mode, get("BACKEND_URL")) {
            (_, Some(url)) => Some(BackendConfig {
                url: url.trim_end_matches('/').to_owned(),
                anon_key: get("BACKEND_ANON_KEY").unwrap_or_default(),
                timeouts,
            }),
            (StoreMode::Memory, None) => None,
            (_, None) => return Err(ConfigError::Missing("BACKEND_URL")),
        };

        let database = match store_mode {
            StoreMode::Postgres => Some(DatabaseConfig {
                url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
                max_connections: parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS)?,
            }),
            StoreMode::Rest | StoreMode::Memory => None,
        };

        let auth = AuthOptions {
            capabilities: parse_capabilities(get("AUTH_CAPABILITIES").as_deref())?,
            redirect_provider: get("AUTH_REDIRECT_PROVIDER").unwrap_or_else(|| DEFAULT_REDIRECT_PROVIDER.to_owned()),
            site_url: get("SITE_URL")
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
        };

        let sign_in = match (get("SIGN_IN_EMAIL"), get("SIGN_IN_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials::new(email, password)),
            _ => None,
        };

        Ok(Self { store_mode, backend, database, auth, sign_in })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_store_mode(raw: Option<&str>) -> Result<StoreMode, ConfigError> {
    match raw.unwrap_or("rest").to_ascii_lowercase().as_str() {
        "rest" => Ok(StoreMode::Rest),
        "postgres" | "pg" => Ok(StoreMode::Postgres),
        "memory" => Ok(StoreMode::Memory),
        other => Err(ConfigError::Invalid { key: "STORE_MODE", value: other.to_owned() }),
    }
}

fn parse_capabilities(raw: Option<&str>) -> Result<AuthCapabilities, ConfigError> {
    let Some(raw) = raw else {
        return Ok(AuthCapabilities::default());
    };
    let mut caps = AuthCapabilities { password: false, redirect: false };
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.to_ascii_lowercase().as_str() {
            "password" => caps.password = true,
            "redirect" | "oauth" => caps.redirect = true,
            _ => return Err(ConfigError::Invalid { key: "AUTH_CAPABILITIES", value: raw.to_owned() }),
        }
    }
    if !caps.password && !caps.redirect {
        return Err(ConfigError::Invalid { key: "AUTH_CAPABILITIES", value: raw.to_owned() });
    }
    Ok(caps)
}
