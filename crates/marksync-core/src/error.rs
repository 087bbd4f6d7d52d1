//! Error types for marksync-core

use thiserror::Error;

use crate::order::OrderKeyError;

/// Result type alias using marksync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in marksync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed order key or wire payload
    #[error("Format error: {0}")]
    Format(String),

    /// Node or object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sync setup rejected (wrong sync words, relay refused the chain)
    #[error("Sync setup error: {0}")]
    SyncSetup(String),

    /// Local invariant violated; indicates a bug, never retried
    #[error("Internal consistency failure: {0}")]
    Consistency(String),

    /// Relay request failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Relay request did not complete in time
    #[error("Request timed out")]
    Timeout,
}

impl From<OrderKeyError> for Error {
    fn from(error: OrderKeyError) -> Self {
        Self::Format(error.to_string())
    }
}

impl Error {
    /// Whether the error is worth retrying on the next poll tick.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Io(_))
    }
}
