//! Error types for leakvault ingestion

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for both ingestion channels
///
/// Variants are split into two groups. Recoverable errors (`AlreadyExists`,
/// `DuplicateEntry`, `NotFound`, `MalformedInput`, `Rejected`) concern a single
/// registration, entry or frame, and the caller skips it. Fatal errors
/// (`Persistence`, `Io`, `Cancelled`, ...) abort the enclosing file or
/// submission. Use [`IngestError::is_fatal`] rather than matching by hand.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Storage refused one row for a reason other than duplication
    #[error("Rejected by storage: {0}")]
    Rejected(String),

    /// Storage is unavailable or misbehaving as a whole
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether this error must abort the enclosing file, batch set or submission.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::AlreadyExists(_)
                | IngestError::DuplicateEntry(_)
                | IngestError::NotFound(_)
                | IngestError::MalformedInput(_)
                | IngestError::Rejected(_)
        )
    }

    /// Whether this error is a uniqueness collision (file, metadata or entry).
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            IngestError::AlreadyExists(_) | IngestError::DuplicateEntry(_)
        )
    }
}
