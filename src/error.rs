use thiserror::Error;

/// Main error type for kgraph
#[derive(Error, Debug)]
pub enum KgraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schema migration file failed to apply
    #[error("Migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    /// The extraction payload is not a list of triple objects.
    /// `raw` keeps the original payload for diagnostics.
    #[error("Extraction format error: {reason}")]
    ExtractionFormat { reason: String, raw: String },

    /// A single triple could not be written; the rest of the batch continues
    #[error("Merge failed: {0}")]
    MergeTransient(String),

    /// Storage backend cannot be reached or opened
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Export serialization errors
    #[error("Export error: {0}")]
    Export(String),

    /// Blocking database task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl KgraphError {
    /// True when the error means the backend is unreachable rather than
    /// that a particular operation failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KgraphError::StorageUnavailable(_))
    }
}

/// Convenient Result type using KgraphError
pub type Result<T> = std::result::Result<T, KgraphError>;
