//! Error types for the chat core

use thiserror::Error;

/// Errors reported by a data-store or file-storage collaborator
#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("Data store unreachable: {0}")]
    Unreachable(String),
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),
    #[error("Row not found: {0}")]
    NotFound(String),
    #[error("Invalid row: {0}")]
    InvalidRow(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the public chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    /// Read failure; recoverable by re-fetching
    #[error("Fetch failed: {0}")]
    Fetch(#[source] DataStoreError),

    /// Write failure during compose; the optimistic message was rolled back
    #[error("Send failed: {0}")]
    Send(#[source] DataStoreError),

    /// Caller supplied bad input; no I/O was performed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Duplicate-conversation race; retried internally by `start_conversation`
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
