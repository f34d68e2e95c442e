//! Storage interfaces for the pull path
//!
//! The file registry and the entry store are traits so that the block
//! processor can run against Postgres in production and against the
//! in-memory backend for dry runs and tests. Both backends enforce the same
//! uniqueness contracts: one file per fingerprint, one entry per
//! `(file_id, url, username, password)`.

use async_trait::async_trait;
use leakvault_common::{
    CredentialEntry, EntryKey, FileStatus, IngestError, IngestedFile, NewCredentialEntry,
    NewIngestedFile, Result,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Content-addressed file registry
#[async_trait]
pub trait FileRegistry: Send + Sync {
    /// Register a new file and return its identifier.
    ///
    /// Fails with [`IngestError::AlreadyExists`] when the fingerprint is
    /// already registered. The uniqueness check and the insert are one
    /// atomic step.
    async fn register(&self, file: &NewIngestedFile) -> Result<i64>;

    /// Resolve a fingerprint to its file identifier, or [`IngestError::NotFound`].
    async fn lookup(&self, fingerprint: &str) -> Result<i64>;

    async fn get(&self, file_id: i64) -> Result<IngestedFile>;

    /// Increment the processed-entry counter by `delta`.
    async fn add_processed(&self, file_id: i64, delta: i64) -> Result<()>;

    /// Stamp `processed_at` and set the final status.
    async fn finish(&self, file_id: i64, status: FileStatus) -> Result<()>;
}

/// Deduplicating entry store keyed by [`EntryKey`]
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn exists(&self, key: &EntryKey) -> Result<bool>;

    /// Insert an entry and return its identifier.
    ///
    /// A key collision yields [`IngestError::DuplicateEntry`], which callers
    /// skip. Any error for which [`IngestError::is_fatal`] holds must abort
    /// the enclosing file.
    async fn insert(&self, entry: &NewCredentialEntry) -> Result<i64>;

    /// Entries stored for one file, in insertion order
    async fn list(&self, file_id: i64) -> Result<Vec<CredentialEntry>>;

    async fn count(&self, file_id: i64) -> Result<i64>;
}

/// Map a sqlx error onto the ingestion taxonomy.
///
/// `on_unique` builds the error reported for a unique violation, since only
/// the caller knows whether the collision concerns a file, an entry or a
/// submission.
pub fn classify(err: sqlx::Error, on_unique: impl FnOnce() -> IngestError) -> IngestError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => on_unique(),
        sqlx::Error::Database(db_err) => IngestError::Rejected(db_err.message().to_string()),
        sqlx::Error::RowNotFound => IngestError::NotFound("row".to_string()),
        // Io, Tls, Protocol, PoolTimedOut, PoolClosed, decoding and the rest
        // mean the store as a whole cannot be trusted for this run.
        other => IngestError::Persistence(other.to_string()),
    }
}

/// Classification for statements that never insert, where a unique
/// violation cannot be an expected duplicate.
pub fn storage_error(err: sqlx::Error) -> IngestError {
    classify(err, || {
        IngestError::Rejected("unexpected unique violation".to_string())
    })
}
