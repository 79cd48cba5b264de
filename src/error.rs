//! Error types for specstream.

use thiserror::Error;

/// Result type alias for specstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for specstream.
#[derive(Error, Debug)]
pub enum Error {
    /// Transient failure talking to the target model (timeout or 5xx).
    /// Eligible for a single retry before becoming fatal.
    #[error("target request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    TransientRemote {
        status: Option<u16>,
        message: String,
    },

    /// Malformed or under-length response from the target model.
    #[error("invalid target response: {0}")]
    InvalidRemote(String),

    /// Draft model inference failed.
    #[error("draft model error: {0}")]
    LocalInference(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Invalid generation request (k, temperature, or max_tokens out of
    /// range, or empty prompt). Raised before any work is done.
    #[error("invalid request: {0}")]
    Precondition(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Event sink rejected an event.
    #[error("event sink error: {0}")]
    Sink(String),

    /// Tensor operation error from the draft adapter.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a single retry with backoff is warranted.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::TransientRemote { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
