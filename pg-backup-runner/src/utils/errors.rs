//! Error types for the backup runner.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock error on '{name}': {source}")]
    Lock {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RunnerError {
    /// Configuration problems are reported before any lock is taken.
    pub fn is_config(&self) -> bool {
        matches!(self, RunnerError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
