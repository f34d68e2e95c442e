//! Submission persistence for the push path
//!
//! Metadata rows are unique by hash and data rows are unique by
//! `(metadata_id, record_digest)`. Both inserts are conflict-tolerant so a
//! whole submission can be replayed safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use leakvault_common::fingerprint::composite_digest;
use leakvault_common::{IngestError, Result};
use leakvault_ingest::storage::storage_error;

/// Metadata block of a submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionMetadata {
    pub source: String,
    /// Defaults to the time of insertion when absent
    pub collected_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub notes: String,
    /// Ignored in favour of the submission's top-level hash
    pub hash: String,
}

/// One credential record of a submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionRecord {
    pub email: String,
    pub password: String,
    pub username: String,
    pub domain: String,
}

impl SubmissionRecord {
    /// Uniqueness digest over the trimmed `email, username, password, domain`.
    pub fn digest(&self) -> String {
        composite_digest(&[&self.email, &self.username, &self.password, &self.domain])
    }
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn find_metadata(&self, hash: &str) -> Result<Option<i64>>;

    /// Insert the metadata row unless `hash` is taken, then return the id of
    /// whichever row holds `hash`. Losing a concurrent race is not an error.
    async fn insert_metadata(&self, hash: &str, metadata: &SubmissionMetadata) -> Result<i64>;

    /// Insert one record under `metadata_id`. Returns `false` when an equal
    /// record was already stored.
    async fn insert_record(&self, metadata_id: i64, record: &SubmissionRecord) -> Result<bool>;

    async fn count_records(&self, metadata_id: i64) -> Result<i64>;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgSubmissionRepository {
    pool: PgPool,
}

impl PgSubmissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionRepository for PgSubmissionRepository {
    async fn find_metadata(&self, hash: &str) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM submission_metadata WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn insert_metadata(&self, hash: &str, metadata: &SubmissionMetadata) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO submission_metadata (hash, source, collected_at, tags, notes)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(hash)
        .bind(&metadata.source)
        .bind(metadata.collected_at.unwrap_or_else(Utc::now))
        .bind(&metadata.tags)
        .bind(&metadata.notes)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let id = match inserted {
            Some(id) => id,
            None => {
                sqlx::query_scalar::<_, i64>("SELECT id FROM submission_metadata WHERE hash = $1")
                    .bind(hash)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(storage_error)?
            },
        };

        tx.commit().await.map_err(storage_error)?;
        Ok(id)
    }

    async fn insert_record(&self, metadata_id: i64, record: &SubmissionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO submission_data
                (metadata_id, email, username, password, domain, record_digest)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (metadata_id, record_digest) DO NOTHING
            "#,
        )
        .bind(metadata_id)
        .bind(record.email.trim())
        .bind(record.username.trim())
        .bind(record.password.trim())
        .bind(record.domain.trim())
        .bind(record.digest())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_records(&self, metadata_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM submission_data WHERE metadata_id = $1")
            .bind(metadata_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct State {
    metadata: Vec<SubmissionMetadata>,
    by_hash: HashMap<String, i64>,
    records: HashSet<(i64, String)>,
}

/// Submission store kept in process memory
#[derive(Debug, Default)]
pub struct MemorySubmissionRepository {
    state: RwLock<State>,
}

impl MemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn metadata_count(&self) -> usize {
        self.state.read().await.metadata.len()
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[async_trait]
impl SubmissionRepository for MemorySubmissionRepository {
    async fn find_metadata(&self, hash: &str) -> Result<Option<i64>> {
        Ok(self.state.read().await.by_hash.get(hash).copied())
    }

    async fn insert_metadata(&self, hash: &str, metadata: &SubmissionMetadata) -> Result<i64> {
        let mut state = self.state.write().await;
        if let Some(id) = state.by_hash.get(hash) {
            return Ok(*id);
        }

        let mut stored = metadata.clone();
        stored.hash = hash.to_string();
        stored.collected_at = stored.collected_at.or_else(|| Some(Utc::now()));
        state.metadata.push(stored);

        let id = state.metadata.len() as i64;
        state.by_hash.insert(hash.to_string(), id);
        Ok(id)
    }

    async fn insert_record(&self, metadata_id: i64, record: &SubmissionRecord) -> Result<bool> {
        let mut state = self.state.write().await;
        if metadata_id < 1 || metadata_id as usize > state.metadata.len() {
            return Err(IngestError::Rejected(format!(
                "metadata {} does not exist",
                metadata_id
            )));
        }
        Ok(state.records.insert((metadata_id, record.digest())))
    }

    async fn count_records(&self, metadata_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|(id, _)| *id == metadata_id)
            .count() as i64)
    }
}
