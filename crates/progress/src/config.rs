//! Progress client configuration loaded from environment variables.

use std::time::Duration;

use crate::reconnect::ReconnectConfig;
use crate::types::JobId;

/// Path prefix of the per-job progress endpoint.
const PROGRESS_PATH: &str = "/ws/progress";

/// Default delay between a `complete` message and closing the socket.
const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Where and how to reach the progress WebSocket endpoint.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressConfig {
    /// `wss` when the API origin is served over HTTPS.
    pub secure: bool,
    /// Host and optional port, e.g. `localhost:8000`.
    pub host: String,
    /// Backoff parameters for abnormal closures.
    pub reconnect: ReconnectConfig,
    /// How long to keep reading after `complete` before closing.
    pub teardown_grace: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            secure: false,
            host: "localhost:8000".into(),
            reconnect: ReconnectConfig::default(),
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }
}

impl ProgressConfig {
    /// Build a config from an HTTP(S) origin such as
    /// `https://api.example.com/`. The WebSocket scheme mirrors the
    /// origin's scheme.
    pub fn from_origin(origin: &str) -> Result<Self, ConfigError> {
        let (secure, rest) = if let Some(rest) = origin.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(ConfigError::InvalidOrigin(origin.to_string()));
        };

        let host = rest.trim_end_matches('/');
        if host.is_empty() || host.contains('/') {
            return Err(ConfigError::InvalidOrigin(origin.to_string()));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            ..Default::default()
        })
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `PROGRESS_API_URL`                | `http://localhost:8000` |
    /// | `PROGRESS_WS_HOST`                | host of the API URL     |
    /// | `PROGRESS_RECONNECT_BASE_MS`      | `1000`                  |
    /// | `PROGRESS_RECONNECT_MAX_MS`       | `10000`                 |
    /// | `PROGRESS_RECONNECT_MAX_ATTEMPTS` | `5`                     |
    /// | `PROGRESS_TEARDOWN_GRACE_MS`      | `1000`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin = lookup("PROGRESS_API_URL").unwrap_or_else(|| "http://localhost:8000".into());
        let mut config = Self::from_origin(&origin)?;

        if let Some(host) = lookup("PROGRESS_WS_HOST").filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().trim_end_matches('/').to_string();
        }

        let defaults = ReconnectConfig::default();
        config.reconnect = ReconnectConfig {
            base_delay: parse_millis(&lookup, "PROGRESS_RECONNECT_BASE_MS")?
                .unwrap_or(defaults.base_delay),
            max_delay: parse_millis(&lookup, "PROGRESS_RECONNECT_MAX_MS")?
                .unwrap_or(defaults.max_delay),
            max_attempts: parse_number(&lookup, "PROGRESS_RECONNECT_MAX_ATTEMPTS")?
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(defaults.max_attempts),
        };
        config.teardown_grace =
            parse_millis(&lookup, "PROGRESS_TEARDOWN_GRACE_MS")?.unwrap_or(DEFAULT_TEARDOWN_GRACE);

        Ok(config)
    }

    /// WebSocket URL of the progress endpoint for `job_id`.
    ///
    /// The id is percent-encoded so it always stays a single path segment.
    pub fn ws_url(&self, job_id: &JobId) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let segment = urlencoding::encode(job_id.as_str());
        format!("{scheme}://{}{PROGRESS_PATH}/{segment}/", self.host)
    }
}

fn parse_number<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_number(lookup, key)?.map(Duration::from_millis))
}

/// Errors raised while loading [`ProgressConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The API origin is not an `http://` or `https://` URL.
    #[error("Invalid API origin: {0}")]
    InvalidOrigin(String),

    /// A numeric variable could not be parsed.
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}
