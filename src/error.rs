use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefsError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
}

impl DefsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DefsError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, DefsError>;
