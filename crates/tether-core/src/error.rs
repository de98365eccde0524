//! Error types for the resilience layer.
//!
//! Every failure an orchestrated call can produce is classified here, so the
//! application never sees an unclassified transport or storage error.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Tether.
#[derive(Debug, Error)]
pub enum TetherError {
    // Transport-level failures (no response reached us)
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // HTTP status failures
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Client error {status}: {body}")]
    Client { status: u16, body: String },

    // Resilience gates
    #[error("Circuit breaker open for {target}")]
    CircuitOpen { target: String },

    #[error("Circuit breaker for {target} is testing recovery, try again shortly")]
    CircuitTesting { target: String },

    #[error("Request cancelled")]
    Cancelled,

    // Storage errors
    #[error("Storage quota exceeded: {used} of {quota} bytes used, {needed} more needed")]
    QuotaExceeded { used: u64, quota: u64, needed: u64 },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Credential errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        TetherError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for TetherError {
    fn from(err: rusqlite::Error) -> Self {
        TetherError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TetherError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TetherError::Timeout(std::time::Duration::from_secs(0))
        } else {
            TetherError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl TetherError {
    /// Build a transport error without an underlying reqwest cause.
    pub fn network(message: impl Into<String>) -> Self {
        TetherError::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Classify an HTTP status into a client or server error.
    ///
    /// Returns `None` for statuses below 400.
    pub fn from_status(status: u16, body: impl Into<String>) -> Option<Self> {
        match status {
            400..=499 => Some(TetherError::Client {
                status,
                body: body.into(),
            }),
            500..=599 => Some(TetherError::Server {
                status,
                body: body.into(),
            }),
            _ => None,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only failures where no response arrived, or the server answered 5xx.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TetherError::Network { .. } | TetherError::Timeout(_) | TetherError::Server { .. }
        )
    }

    /// True when the request never produced an HTTP response.
    pub fn is_network_level(&self) -> bool {
        matches!(self, TetherError::Network { .. } | TetherError::Timeout(_))
    }

    /// True when a read may be answered from the cache instead.
    pub fn allows_cache_fallback(&self) -> bool {
        matches!(
            self,
            TetherError::Network { .. }
                | TetherError::Timeout(_)
                | TetherError::Server { .. }
                | TetherError::CircuitOpen { .. }
                | TetherError::CircuitTesting { .. }
        )
    }

    /// True when a circuit breaker rejected the call before any I/O.
    pub fn is_circuit_rejection(&self) -> bool {
        matches!(
            self,
            TetherError::CircuitOpen { .. } | TetherError::CircuitTesting { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TetherError::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TetherError::Server { status, .. } | TetherError::Client { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
