//! Top-level error types for ikura.

use crate::serialise::CodecError;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database load and sync errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database file does not exist")]
    Missing,

    #[error("database truncated (not enough bytes)")]
    Truncated,

    #[error("invalid database identifier (expected {expected:?}, got {found:?})")]
    BadMagic { expected: String, found: String },

    #[error("invalid database version {found} (expected <= {current})")]
    VersionTooNew { found: u32, current: u32 },

    #[error("failed to read {0} data")]
    Section(&'static str),

    #[error("failed to deserialise: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend driver errors (connect, auth, protocol).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connection failed after {attempts} attempts")]
    Connect { attempts: u32 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BackendError::WebSocket(Box::new(e))
    }
}
