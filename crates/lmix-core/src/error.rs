use std::io;

use thiserror::Error;

/// Failures talking to the LevelMix backend outside the upload handoff.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Error text supplied by the server in an `{error}` body.
    #[error("{0}")]
    Server(String),
    #[error("{endpoint} responded with HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{0}")]
    Message(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ApiError {
    pub fn message<T: Into<String>>(message: T) -> Self {
        ApiError::Message(message.into())
    }
}
