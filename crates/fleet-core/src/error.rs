//! Error types for Fleet Sync.
//!
//! Only run-level failures are errors. Per-item vendor failures during a
//! reconciliation pass are carried as [`crate::inventory::Fetch`] values and
//! never surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the fleet sync library.
#[derive(Debug, Error)]
pub enum FleetError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The registry answered a listing call with a failure.
    #[error("Registry error during {operation}: {message}")]
    Vendor {
        operation: String,
        message: String,
        status_code: Option<u16>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Job control
    #[error("Sync run cancelled")]
    Cancelled,

    #[error("A run of {job} is already in progress")]
    RunInProgress { job: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for fleet sync operations.
pub type Result<T> = std::result::Result<T, FleetError>;

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for FleetError {
    fn from(err: rusqlite::Error) -> Self {
        FleetError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FleetError::Timeout(std::time::Duration::from_secs(0))
        } else {
            FleetError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl FleetError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        FleetError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a registry error for a failed listing call.
    pub fn vendor(operation: impl Into<String>, message: impl Into<String>) -> Self {
        FleetError::Vendor {
            operation: operation.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Check if a failed run should be retried before the next scheduled tick.
    ///
    /// Commit failures and transport problems are retryable. Cancellation,
    /// overlapping runs, and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FleetError::Database { .. } | FleetError::Network { .. } | FleetError::Timeout(_) => {
                true
            }
            FleetError::Vendor { status_code, .. } => {
                matches!(status_code, None | Some(408) | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}
