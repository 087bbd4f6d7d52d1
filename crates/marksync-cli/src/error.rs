use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] marksync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No bookmark or folder with id {0}")]
    NodeNotFound(i64),
    #[error("Node {0} is not a folder")]
    NotAFolder(i64),
    #[error("Title cannot be empty")]
    EmptyTitle,
    #[error("No sync words provided")]
    EmptySyncWords,
    #[error("No order keys provided")]
    EmptyOrderKeys,
    #[error("No order key fits between {0}")]
    NoRoomBetween(String),
    #[error("Sync is not configured. Run `marksync setup new` or `marksync setup join <words>`.")]
    SyncNotConfigured,
}
