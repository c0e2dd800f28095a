use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("rate limited with {status} (banned until {ban_until_ms:?})")]
    RateLimited {
        status: StatusCode,
        ban_until_ms: Option<u64>,
    },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Transport failures, rate limits and 5xx responses are worth another attempt.
    /// Client errors and malformed payloads are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::RateLimited { .. } => true,
            FetchError::UpstreamStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
