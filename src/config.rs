use crate::error::{Result, ScreenerError};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Status poll cadence (milliseconds) while the push channel is not connected.
pub const POLL_INTERVAL_MS: u64 = 2000;

/// Reconnect backoff ladder in milliseconds; the last value repeats.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[500, 1000, 2000, 4000, 8000];

/// Consecutive failed connection attempts before the push channel gives up
/// and tracking continues on polling alone.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Heartbeat ping interval (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Capacity of the push channel between the socket task and the tracker.
pub const CHANNEL_CAPACITY: usize = 64;

/// HTTP request timeout (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// REST base, e.g. `http://localhost:8000/api/v1` (SCREENER_API_URL).
    pub api_url: String,
    /// WebSocket base; derived from `api_url` when SCREENER_WS_URL is unset.
    pub ws_url: String,
    pub log_level: String,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: Vec<u64>,
    pub max_reconnect_attempts: u32,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("SCREENER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let ws_url = match std::env::var("SCREENER_WS_URL") {
            Ok(url) => url,
            Err(_) => derive_ws_url(&api_url)?,
        };
        Ok(Self {
            api_url,
            ws_url,
            log_level: std::env::var("SCREENER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            poll_interval_ms: env_u64("SCREENER_POLL_INTERVAL_MS", POLL_INTERVAL_MS),
            reconnect_backoff_ms: RECONNECT_BACKOFF_MS.to_vec(),
            max_reconnect_attempts: env_u64(
                "SCREENER_MAX_RECONNECT_ATTEMPTS",
                MAX_RECONNECT_ATTEMPTS as u64,
            ) as u32,
            http_timeout_secs: env_u64("SCREENER_HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS),
        })
    }

    /// Config for a known server base URL with default timings.
    pub fn for_server(api_url: &str) -> Result<Self> {
        let ws_url = derive_ws_url(api_url)?;
        Ok(Self {
            api_url: api_url.to_string(),
            ws_url,
            log_level: "info".to_string(),
            poll_interval_ms: POLL_INTERVAL_MS,
            reconnect_backoff_ms: RECONNECT_BACKOFF_MS.to_vec(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            http_timeout_secs: HTTP_TIMEOUT_SECS,
        })
    }
}

fn derive_ws_url(api_url: &str) -> Result<String> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(ScreenerError::Config(format!(
            "cannot derive a WebSocket URL from {api_url}"
        )))
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
