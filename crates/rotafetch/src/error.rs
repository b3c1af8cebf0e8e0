//! Error types for engine construction and collaborator I/O.
//!
//! Per-attempt faults (blocks, timeouts, bad proxies) are never errors:
//! they surface as [`AttemptOutcome`](crate::executor::AttemptOutcome) values
//! and finally as a [`FetchResult::Failure`](crate::controller::FetchResult).

/// All errors the engine can raise to its caller.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("proxy source '{name}' failed: {message}")]
    Source { name: String, message: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    pub(crate) fn source_failed(name: &str, message: impl Into<String>) -> Self {
        FetchError::Source {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
