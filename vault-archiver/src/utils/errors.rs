//! Custom error types for the vault archiver.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid vault path: {}", .0.display())]
    InvalidVault(PathBuf),

    #[error("Failed to create archive directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open archive file {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Traversal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode {} into archive: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list archive directory {}: {source}", path.display())]
    DirectoryList {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read metadata of {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to delete {}: {source}", path.display())]
    Deletion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Task error: {0}")]
    Task(String),
}

impl ArchiverError {
    /// True when the error came from reading the vault rather than writing the archive.
    pub fn is_traversal(&self) -> bool {
        matches!(self, ArchiverError::Traversal { .. })
    }
}

impl From<tokio::task::JoinError> for ArchiverError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ArchiverError::Task("task was aborted".to_string())
        } else {
            ArchiverError::Task(format!("task panicked: {}", err))
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
