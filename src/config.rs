use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// How the auth token is presented to the progress store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// `Authorization: Token <token>` (Django REST framework token auth)
    Token,
}

impl AuthScheme {
    pub fn header_value(&self, token: &str) -> String {
        match self {
            AuthScheme::Bearer => format!("Bearer {}", token),
            AuthScheme::Token => format!("Token {}", token),
        }
    }
}

/// Knobs for session tracking and flush scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Watched time between periodic flushes while playing
    pub flush_interval: Duration,
    /// Attempts per flush before giving up and keeping intervals pending
    pub max_flush_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            flush_interval: Duration::from_secs(15),
            max_flush_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl TrackerConfig {
    pub fn flush_interval_secs(&self) -> f64 {
        self.flush_interval.as_secs_f64()
    }
}

/// Application configuration
/// In debug builds: loads .env first, then reads the environment
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Base URL of the progress API, without trailing slash
    pub api_url: String,
    /// Token of the signed-in user, if any
    pub auth_token: Option<String>,
    pub auth_scheme: AuthScheme,
    pub request_timeout: Duration,
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            auth_scheme: AuthScheme::default(),
            request_timeout: Duration::from_secs(10),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("Config: dev mode, loaded .env file");
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let api_url = lookup("WATCHTRACK_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_url);

        let auth_token = lookup("WATCHTRACK_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let auth_scheme = match lookup("WATCHTRACK_AUTH_SCHEME") {
            None => defaults.auth_scheme,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "bearer" => AuthScheme::Bearer,
                "token" => AuthScheme::Token,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "WATCHTRACK_AUTH_SCHEME",
                        value,
                    })
                }
            },
        };

        let flush_interval = parse_number(&lookup, "WATCHTRACK_FLUSH_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.tracker.flush_interval);

        let max_flush_attempts = parse_number(&lookup, "WATCHTRACK_MAX_FLUSH_ATTEMPTS")?
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(defaults.tracker.max_flush_attempts);

        let retry_backoff = parse_number(&lookup, "WATCHTRACK_RETRY_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.tracker.retry_backoff);

        let request_timeout = parse_number(&lookup, "WATCHTRACK_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        if auth_token.is_none() {
            warn!("Config: no WATCHTRACK_TOKEN set, requests will be unauthenticated");
        }

        Ok(Config {
            api_url,
            auth_token,
            auth_scheme,
            request_timeout,
            tracker: TrackerConfig {
                flush_interval,
                max_flush_attempts,
                retry_backoff,
            },
        })
    }

    /// Full `Authorization` header value, when a token is configured
    pub fn authorization(&self) -> Option<String> {
        self.auth_token
            .as_deref()
            .map(|token| self.auth_scheme.header_value(token))
    }
}

fn parse_number<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}
