//! Error types for Ratchet
//!
//! Centralized error handling using thiserror. Failures that a pipeline step
//! produces are recorded in the ledger as [`crate::domain::StepError`] and never
//! surface here; these variants are what the store and controller APIs return
//! to their callers.

use thiserror::Error;

/// All error types that can occur in Ratchet
#[derive(Debug, Error)]
pub enum RatchetError {
    /// Artifact, ledger entry or run lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ledger double-write with a divergent payload
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A payload did not satisfy its declared schema
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    /// A declared input was never produced OK
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// A step collaborator reported an error
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// A step collaborator exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The run was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Pipeline definition rejected at construction
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error from the durable ledger
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl RatchetError {
    /// Returns true for errors that signal a broken store contract rather than
    /// an absent record.
    pub fn is_integrity(&self) -> bool {
        matches!(self, RatchetError::Conflict(_) | RatchetError::Storage(_))
    }

    /// Map a poisoned lock into a storage error.
    pub(crate) fn poisoned<T>(err: std::sync::PoisonError<T>) -> Self {
        RatchetError::Storage(format!("lock poisoned: {}", err))
    }
}

/// Result type alias for Ratchet operations
pub type Result<T> = std::result::Result<T, RatchetError>;
