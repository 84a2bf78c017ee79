use std::env;
use std::time::Duration;

use crate::error::SyncError;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3001";
const DEFAULT_WS_URL: &str = "ws://localhost:3001/ws";

/// Reconnect schedule: exponential growth from `initial` up to `max`, with a
/// symmetric random jitter of `jitter_percent` applied to the capped delay.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter_percent: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_percent: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay with no growth and no jitter. Handy for tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter_percent: 0.0,
        }
    }
}

/// Client-side sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the backend REST API, e.g. `https://nommie.app`.
    pub api_base_url: String,
    /// Full URL of the realtime endpoint, e.g. `wss://nommie.app/ws`.
    pub ws_url: String,
    /// Timeout for the short-lived credential request made before each handshake.
    pub credential_timeout: Duration,
    /// Time allowed between opening the socket and receiving `hello_ack`.
    pub handshake_timeout: Duration,
    /// Timeout for snapshot and mutation requests.
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// A refresh still in flight after this long raises the slow-sync flag.
    pub slow_sync_threshold: Duration,
    /// How long a successful mutation may stay unconfirmed before a refresh is forced.
    pub mutation_confirm_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            credential_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            slow_sync_threshold: Duration::from_secs(1),
            mutation_confirm_window: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `NOMMIE_API_URL`
    /// - `NOMMIE_WS_URL` (derived from `NOMMIE_API_URL` when unset)
    /// - `NOMMIE_CREDENTIAL_TIMEOUT_MS`, `NOMMIE_HANDSHAKE_TIMEOUT_MS`,
    ///   `NOMMIE_REQUEST_TIMEOUT_MS`
    /// - `NOMMIE_RECONNECT_INITIAL_MS`, `NOMMIE_RECONNECT_MAX_MS`
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();

        if let Ok(api) = env::var("NOMMIE_API_URL") {
            config = config.with_api_origin(&api)?;
        }
        if let Ok(ws) = env::var("NOMMIE_WS_URL") {
            config.ws_url = ws;
        }
        if let Some(d) = duration_ms_var("NOMMIE_CREDENTIAL_TIMEOUT_MS")? {
            config.credential_timeout = d;
        }
        if let Some(d) = duration_ms_var("NOMMIE_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = d;
        }
        if let Some(d) = duration_ms_var("NOMMIE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = d;
        }
        if let Some(d) = duration_ms_var("NOMMIE_RECONNECT_INITIAL_MS")? {
            config.backoff.initial = d;
        }
        if let Some(d) = duration_ms_var("NOMMIE_RECONNECT_MAX_MS")? {
            config.backoff.max = d;
        }
        if config.backoff.max < config.backoff.initial {
            return Err(SyncError::config(format!(
                "NOMMIE_RECONNECT_MAX_MS ({:?}) must not be below NOMMIE_RECONNECT_INITIAL_MS ({:?})",
                config.backoff.max, config.backoff.initial
            )));
        }

        Ok(config)
    }

    /// Point both the REST API and the realtime endpoint at `api_base_url`,
    /// deriving `ws_url` from its scheme and host.
    pub fn with_api_origin(mut self, api_base_url: &str) -> Result<Self, SyncError> {
        self.ws_url = derive_ws_url(api_base_url)?;
        self.api_base_url = api_base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Set only the REST base URL; `ws_url` is left as is.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    #[must_use]
    pub fn with_credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_slow_sync_threshold(mut self, threshold: Duration) -> Self {
        self.slow_sync_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_mutation_confirm_window(mut self, window: Duration) -> Self {
        self.mutation_confirm_window = window;
        self
    }
}

fn duration_ms_var(name: &str) -> Result<Option<Duration>, SyncError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| SyncError::config(format!("{name} must be a whole number of milliseconds, got: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// `http://host` -> `ws://host/ws`, `https://host` -> `wss://host/ws`.
fn derive_ws_url(api_base_url: &str) -> Result<String, SyncError> {
    let base = api_base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else {
        Err(SyncError::config(format!(
            "API URL must start with http:// or https://, got: '{api_base_url}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_api_scheme() {
        assert_eq!(
            derive_ws_url("https://nommie.app/").unwrap(),
            "wss://nommie.app/ws"
        );
        assert_eq!(
            derive_ws_url("http://localhost:3001").unwrap(),
            "ws://localhost:3001/ws"
        );
        assert!(derive_ws_url("ftp://nope").is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = SyncConfig::default();
        assert_eq!(config.slow_sync_threshold, Duration::from_secs(1));
        assert!(config.backoff.initial < config.backoff.max);
        assert!(config.credential_timeout < config.handshake_timeout);
    }

    #[test]
    fn api_origin_moves_the_realtime_endpoint_too() {
        let config = SyncConfig::default()
            .with_api_origin("https://nommie.app/")
            .unwrap();
        assert_eq!(config.api_base_url, "https://nommie.app");
        assert_eq!(config.ws_url, "wss://nommie.app/ws");

        assert!(SyncConfig::default().with_api_origin("nommie.app").is_err());
    }

    #[test]
    fn builder_overrides() {
        let config = SyncConfig::default()
            .with_ws_url("ws://example/ws")
            .with_backoff(BackoffPolicy::fixed(Duration::from_millis(10)));
        assert_eq!(config.ws_url, "ws://example/ws");
        assert_eq!(config.backoff.max, Duration::from_millis(10));
    }
}
