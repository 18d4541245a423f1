//! Error types for rollcall-core

use thiserror::Error;

/// Result type alias using rollcall-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rollcall-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Member, document or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid configuration (credentials, endpoints)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error talking to the other store
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The other store answered with an error status
    #[error("Remote error: {0}")]
    Remote(String),

    /// An outbound call exceeded its fixed timeout
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the failure is worth retrying on a later tick.
    ///
    /// Invalid input is a data error; everything else may heal on its own.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidInput(_) | Self::Config(_))
    }
}
