//! File scan pipeline
//!
//! `stat -> register -> count lines -> block processor -> finish`. The file
//! row is created before any entry is stored and is closed as `completed` or
//! `failed` depending on how the block processor ended.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leakvault_common::fingerprint::FingerprintSource;
use leakvault_common::{FileStatus, IngestError, NewIngestedFile};

use crate::processor::{BlockConfig, BlockFailure, BlockProcessor};
use crate::progress::{BlockReport, NoProgress, ProgressSink};
use crate::storage::{EntryStore, FileRegistry};

/// One operator request
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub description: String,
    pub source: String,
}

impl IngestRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
            source: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub file_id: i64,
    pub name: String,
    pub fingerprint: String,
    pub report: BlockReport,
}

/// A scan that did not complete. `file_id` is `None` when the failure
/// happened before registration succeeded.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct IngestFailure {
    pub file_id: Option<i64>,
    pub report: BlockReport,
    #[source]
    pub source: IngestError,
}

impl IngestFailure {
    fn before_registration(source: IngestError) -> Self {
        Self {
            file_id: None,
            report: BlockReport::default(),
            source,
        }
    }
}

/// Name, size, type and fingerprint of a file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub name: String,
    pub size: u64,
    pub file_type: String,
    pub fingerprint: String,
}

impl FileIdentity {
    pub async fn from_path(path: &Path) -> leakvault_common::Result<Self> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                IngestError::NotFound(format!("file {}", path.display()))
            },
            _ => IngestError::Io(e),
        })?;

        if !metadata.is_file() {
            return Err(IngestError::MalformedInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::MalformedInput(format!("{} has no file name", path.display())))?;
        let file_type = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let size = metadata.len();
        let fingerprint = FingerprintSource::NameAndSize { name: &name, size }.compute()?;

        Ok(Self {
            name,
            size,
            file_type,
            fingerprint,
        })
    }
}

/// Drives one file through registration and block processing
pub struct FileIngestor {
    registry: Arc<dyn FileRegistry>,
    processor: BlockProcessor,
}

impl FileIngestor {
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        entries: Arc<dyn EntryStore>,
        config: BlockConfig,
    ) -> Self {
        Self::with_progress(registry, entries, config, Arc::new(NoProgress))
    }

    pub fn with_progress(
        registry: Arc<dyn FileRegistry>,
        entries: Arc<dyn EntryStore>,
        config: BlockConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let processor = BlockProcessor::new(registry.clone(), entries, config).with_progress(progress);
        Self {
            registry,
            processor,
        }
    }

    #[tracing::instrument(skip(self, request, cancel), fields(path = %request.path.display()))]
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, IngestFailure> {
        let identity = FileIdentity::from_path(&request.path)
            .await
            .map_err(IngestFailure::before_registration)?;

        let new_file = NewIngestedFile::new(&identity.name, identity.size as i64, &identity.fingerprint)
            .with_source(&request.source)
            .with_description(&request.description)
            .with_file_type(&identity.file_type);

        let file_id = self
            .registry
            .register(&new_file)
            .await
            .map_err(IngestFailure::before_registration)?;
        info!(file_id, name = %identity.name, size = identity.size, "File registered");

        let outcome = self.scan(file_id, &request.path, cancel).await;

        let status = if outcome.is_ok() {
            FileStatus::Completed
        } else {
            FileStatus::Failed
        };
        let finished = self.registry.finish(file_id, status).await;

        match (outcome, finished) {
            (Ok(report), Ok(())) => Ok(IngestSummary {
                file_id,
                name: identity.name,
                fingerprint: identity.fingerprint,
                report,
            }),
            (Ok(report), Err(source)) => Err(IngestFailure {
                file_id: Some(file_id),
                report,
                source,
            }),
            (Err(failure), finished) => {
                if let Err(err) = finished {
                    warn!(file_id, error = %err, "Could not mark file as failed");
                }
                Err(IngestFailure {
                    file_id: Some(file_id),
                    report: failure.report,
                    source: failure.source,
                })
            },
        }
    }

    async fn scan(
        &self,
        file_id: i64,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<BlockReport, BlockFailure> {
        let total_lines = count_lines(path).await.map_err(|source| BlockFailure {
            report: BlockReport::default(),
            source,
        })?;
        let file = File::open(path).await.map_err(|e| BlockFailure {
            report: BlockReport {
                total_lines,
                ..Default::default()
            },
            source: IngestError::Io(e),
        })?;

        self.processor
            .run(file_id, BufReader::new(file), total_lines, cancel)
            .await
    }
}

/// Line count as the block processor will see it: newline-terminated lines
/// plus a trailing unterminated one.
pub async fn count_lines(path: &Path) -> leakvault_common::Result<u64> {
    let mut file = File::open(path).await?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last = None;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        lines += buffer[..read].iter().filter(|b| **b == b'\n').count() as u64;
        last = Some(buffer[read - 1]);
    }

    if matches!(last, Some(byte) if byte != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn ingestor(store: &Arc<MemoryStore>) -> FileIngestor {
        FileIngestor::new(
            store.clone(),
            store.clone(),
            BlockConfig {
                block_size: 2,
                workers: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_registers_and_completes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "Combo.TXT",
            "https://a.com/login:alice:one\nbroken\nhttps://b.com:bob:two\n",
        );
        let store = Arc::new(MemoryStore::new());

        let summary = ingestor(&store)
            .ingest(
                &IngestRequest::new(&path).with_source("forum").with_description("sample"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.report.total_lines, 3);
        assert_eq!(summary.report.stored, 2);
        assert_eq!(summary.report.ignored(), 1);

        let file = store.get(summary.file_id).await.unwrap();
        assert_eq!(file.name, "Combo.TXT");
        assert_eq!(file.file_type, "txt");
        assert_eq!(file.source, "forum");
        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(file.processed_count, 2);
        assert!(file.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_ingest_with_log_progress() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dump.txt", "https://a.com:u1:p\nhttps://a.com:u2:p\nnope\n");
        let store = Arc::new(MemoryStore::new());
        let ingestor = FileIngestor::with_progress(
            store.clone(),
            store.clone(),
            BlockConfig {
                block_size: 1,
                workers: 1,
            },
            Arc::new(crate::progress::LogProgress),
        );

        let summary = ingestor
            .ingest(&IngestRequest::new(&path), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.report.batches, 3);
        assert_eq!(summary.report.stored, 2);
        assert_eq!(summary.report.percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_second_ingest_of_same_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dump.txt", "https://a.com:u:p\n");
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(&store);
        let request = IngestRequest::new(&path);

        ingestor.ingest(&request, &CancellationToken::new()).await.unwrap();
        let failure = ingestor
            .ingest(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.source, IngestError::AlreadyExists(_)));
        assert!(failure.file_id.is_none());
        assert_eq!(store.file_count().await, 1);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let store = Arc::new(MemoryStore::new());
        let failure = ingestor(&store)
            .ingest(
                &IngestRequest::new("/definitely/not/here.txt"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(failure.source, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_scan_marks_file_failed() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dump.txt", "https://a.com:u:p\n");
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = ingestor(&store)
            .ingest(&IngestRequest::new(&path), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(failure.source, IngestError::Cancelled));
        let file = store.get(failure.file_id.unwrap()).await.unwrap();
        assert_eq!(file.status, FileStatus::Failed);
    }

    #[tokio::test]
    async fn test_count_lines() {
        let dir = TempDir::new().unwrap();
        assert_eq!(count_lines(&write_file(&dir, "a", "")).await.unwrap(), 0);
        assert_eq!(count_lines(&write_file(&dir, "b", "x")).await.unwrap(), 1);
        assert_eq!(count_lines(&write_file(&dir, "c", "x\n")).await.unwrap(), 1);
        assert_eq!(count_lines(&write_file(&dir, "d", "x\ny\n\nz")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_identity_fingerprint_uses_name_and_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dump.csv", "12345");
        let identity = FileIdentity::from_path(&path).await.unwrap();

        assert_eq!(identity.size, 5);
        assert_eq!(identity.file_type, "csv");
        assert_eq!(
            identity.fingerprint,
            leakvault_common::fingerprint::name_size_fingerprint("dump.csv", 5)
        );
    }

    #[tokio::test]
    async fn test_directory_is_malformed_input() {
        let dir = TempDir::new().unwrap();
        let err = FileIdentity::from_path(dir.path()).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedInput(_)));
    }
}
