//! Postgres registry and entry store
//!
//! Uniqueness lives in the schema (`files_fingerprint_key` and
//! `entries_file_digest_key`). Inserts use `ON CONFLICT DO NOTHING RETURNING`
//! so a collision comes back as "no row" instead of an aborted statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use leakvault_common::{
    CredentialEntry, EntryKey, FileStatus, IngestError, IngestedFile, NewCredentialEntry,
    NewIngestedFile, Result,
};

use super::{classify, storage_error, EntryStore, FileRegistry};

#[derive(Debug, FromRow)]
struct FileRow {
    id: i64,
    name: String,
    size: i64,
    fingerprint: String,
    source: String,
    description: String,
    file_type: String,
    agent_key: Option<String>,
    status: String,
    processed_count: i64,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<FileRow> for IngestedFile {
    fn from(row: FileRow) -> Self {
        IngestedFile {
            id: row.id,
            name: row.name,
            size: row.size,
            fingerprint: row.fingerprint,
            source: row.source,
            description: row.description,
            file_type: row.file_type,
            agent_key: row.agent_key,
            status: FileStatus::from(row.status),
            processed_count: row.processed_count,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    file_id: i64,
    url: String,
    username: String,
    password: String,
    line: Option<i64>,
    created_at: DateTime<Utc>,
    processed_at: DateTime<Utc>,
}

impl From<EntryRow> for CredentialEntry {
    fn from(row: EntryRow) -> Self {
        CredentialEntry {
            id: row.id,
            file_id: row.file_id,
            url: row.url,
            username: row.username,
            password: row.password,
            line: row.line,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

/// Registry and entry store over a shared connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRegistry for PgStore {
    #[tracing::instrument(skip(self, file), fields(fingerprint = %file.fingerprint))]
    async fn register(&self, file: &NewIngestedFile) -> Result<i64> {
        let already = || IngestError::AlreadyExists(file.fingerprint.clone());

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO files (name, size, fingerprint, source, description, file_type, agent_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&file.name)
        .bind(file.size)
        .bind(&file.fingerprint)
        .bind(&file.source)
        .bind(&file.description)
        .bind(&file.file_type)
        .bind(&file.agent_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, already))?;

        id.ok_or_else(already)
    }

    async fn lookup(&self, fingerprint: &str) -> Result<i64> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        id.ok_or_else(|| IngestError::NotFound(format!("file with fingerprint {}", fingerprint)))
    }

    async fn get(&self, file_id: i64) -> Result<IngestedFile> {
        let row: Option<FileRow> = sqlx::query_as(
            r#"
            SELECT id, name, size, fingerprint, source, description, file_type,
                   agent_key, status, processed_count, created_at, processed_at
            FROM files
            WHERE id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(IngestedFile::from)
            .ok_or_else(|| IngestError::NotFound(format!("file {}", file_id)))
    }

    async fn add_processed(&self, file_id: i64, delta: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE files SET processed_count = processed_count + $2 WHERE id = $1")
                .bind(file_id)
                .bind(delta)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(IngestError::NotFound(format!("file {}", file_id)));
        }
        Ok(())
    }

    async fn finish(&self, file_id: i64, status: FileStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE files SET status = $2, processed_at = NOW() WHERE id = $1")
                .bind(file_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(IngestError::NotFound(format!("file {}", file_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for PgStore {
    async fn exists(&self, key: &EntryKey) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE file_id = $1 AND entry_digest = $2)",
        )
        .bind(key.file_id)
        .bind(key.digest())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn insert(&self, entry: &NewCredentialEntry) -> Result<i64> {
        let key = &entry.key;
        let duplicate = || {
            IngestError::DuplicateEntry(format!(
                "{} / {} in file {}",
                key.url, key.username, key.file_id
            ))
        };

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO entries (file_id, url, username, password, entry_digest, line)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (file_id, entry_digest) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(key.file_id)
        .bind(&key.url)
        .bind(&key.username)
        .bind(&key.password)
        .bind(key.digest())
        .bind(entry.line)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, duplicate))?;

        id.ok_or_else(duplicate)
    }

    async fn list(&self, file_id: i64) -> Result<Vec<CredentialEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT id, file_id, url, username, password, line, created_at, processed_at
            FROM entries
            WHERE file_id = $1
            ORDER BY id
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(CredentialEntry::from).collect())
    }

    async fn count(&self, file_id: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE file_id = $1")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }
}
