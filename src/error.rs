use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScreenerError {
    /// Request failed local validation and was never sent.
    #[error("validation rejected: {0}")]
    Rejected(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response; carries the server's detail message.
    #[error("server rejected request: {0}")]
    Server(String),

    #[error("job not tracked: {0}")]
    UnknownJob(String),

    #[error("results unavailable: {0}")]
    ResultsUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScreenerError>;
