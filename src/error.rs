//! Error types for the suite runner
//!
//! Assertion failures and extraction misses are not errors here: they are
//! recorded as case outcomes and WARN log entries so a run keeps going.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Transport Errors ===
    #[error("Network error: {0}")]
    Network(String),

    #[error("timeout after {0} ms")]
    Timeout(u64),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    // === Collaborator Errors ===
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Report storage error: {0}")]
    Storage(String),

    // === Execution Registry Errors ===
    #[error("Execution '{0}' not found")]
    NotFound(String),

    #[error("Execution '{id}' is still {status}; reports are generated once it finishes")]
    NotTerminal { id: String, status: String },

    #[error("Internal error: {0}")]
    Internal(String),

    // === Wrapped Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Transport failures are the only errors a case retries by default.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
