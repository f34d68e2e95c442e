//! Block processor
//!
//! Streams lines from a reader, cuts them into batches of at most
//! `block_size` lines and runs up to `workers` batches at a time. Each batch
//! runs on its own task: extract, insert, then add the batch's stored count
//! to the file's processed counter.
//!
//! Per-line outcomes (no match, duplicate, rejected row) are counted and the
//! batch continues. A fatal store error stops new batches from being cut,
//! lets in-flight batches drain, and is returned together with the counts
//! reached so far.

use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use leakvault_common::{extract_entry, EntryKey, IngestError, NewCredentialEntry, Result};

use crate::progress::{BlockReport, NoProgress, ProgressSink};
use crate::storage::{EntryStore, FileRegistry};

pub const DEFAULT_BLOCK_SIZE: usize = 1000;
pub const DEFAULT_WORKERS: usize = 2;

/// Batch size and worker pool bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConfig {
    pub block_size: usize,
    pub workers: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl BlockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(IngestError::Config("block size must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(IngestError::Config("worker count must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A run that stopped early, with the counts it reached
#[derive(Debug, thiserror::Error)]
#[error("block processing aborted: {source}")]
pub struct BlockFailure {
    pub report: BlockReport,
    #[source]
    pub source: IngestError,
}

/// Lines owned by exactly one worker
#[derive(Debug)]
struct Batch {
    /// 1-based line number of `lines[0]`
    first_line: u64,
    lines: Vec<String>,
}

struct BatchContext {
    file_id: i64,
    registry: Arc<dyn FileRegistry>,
    entries: Arc<dyn EntryStore>,
    progress: Arc<dyn ProgressSink>,
    report: Mutex<BlockReport>,
}

impl BatchContext {
    async fn process(self: Arc<Self>, batch: Batch) -> Result<()> {
        let mut seen = BlockReport::default();
        let mut outcome = Ok(());

        for (offset, raw) in batch.lines.iter().enumerate() {
            let line = batch.first_line + offset as u64;
            seen.processed_lines += 1;

            let Some(extracted) = extract_entry(raw) else {
                seen.malformed += 1;
                continue;
            };
            let entry = NewCredentialEntry::new(EntryKey::from_extracted(self.file_id, &extracted))
                .at_line(line as i64);

            match self.entries.insert(&entry).await {
                Ok(_) => seen.stored += 1,
                Err(err) if err.is_duplicate() => {
                    debug!(line, "Duplicate entry skipped");
                    seen.duplicates += 1;
                },
                Err(err) if !err.is_fatal() => {
                    warn!(line, error = %err, "Entry rejected");
                    seen.rejected += 1;
                },
                Err(err) => {
                    error!(line, error = %err, "Fatal storage error, abandoning batch");
                    outcome = Err(err);
                    break;
                },
            }
        }

        if seen.stored > 0 {
            if let Err(err) = self
                .registry
                .add_processed(self.file_id, seen.stored as i64)
                .await
            {
                outcome = outcome.and(Err(err));
            }
        }

        let mut report = self.report.lock().await;
        report.processed_lines += seen.processed_lines;
        report.stored += seen.stored;
        report.duplicates += seen.duplicates;
        report.malformed += seen.malformed;
        report.rejected += seen.rejected;
        report.batches += 1;
        // Reported while holding the lock so snapshots reach the sink in order.
        if outcome.is_ok() {
            self.progress.update(&report);
        }

        outcome
    }
}

/// Bounded concurrent batch runner over a shared registry and entry store
pub struct BlockProcessor {
    registry: Arc<dyn FileRegistry>,
    entries: Arc<dyn EntryStore>,
    progress: Arc<dyn ProgressSink>,
    config: BlockConfig,
}

impl BlockProcessor {
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        entries: Arc<dyn EntryStore>,
        config: BlockConfig,
    ) -> Self {
        Self {
            registry,
            entries,
            progress: Arc::new(NoProgress),
            config,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> BlockConfig {
        self.config
    }

    /// Process every line of `reader` into entries of `file_id`.
    ///
    /// `total_lines` comes from a counting pass and only drives the
    /// percentage. `cancel` is checked before each new batch is cut; batches
    /// already running finish.
    #[tracing::instrument(
        skip(self, reader, cancel),
        fields(block_size = self.config.block_size, workers = self.config.workers)
    )]
    pub async fn run<R>(
        &self,
        file_id: i64,
        reader: R,
        total_lines: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<BlockReport, BlockFailure>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        if let Err(source) = self.config.validate() {
            return Err(BlockFailure {
                report: BlockReport {
                    total_lines,
                    ..Default::default()
                },
                source,
            });
        }

        let stop = cancel.child_token();
        let context = Arc::new(BatchContext {
            file_id,
            registry: self.registry.clone(),
            entries: self.entries.clone(),
            progress: self.progress.clone(),
            report: Mutex::new(BlockReport {
                total_lines,
                ..Default::default()
            }),
        });

        self.progress.start(total_lines);

        let results = batches(reader, self.config.block_size, stop.clone())
            .map(|batch| {
                let context = context.clone();
                async move {
                    let batch = batch?;
                    tokio::spawn(context.process(batch))
                        .await
                        .map_err(|e| IngestError::Persistence(format!("batch worker failed: {}", e)))?
                }
            })
            .buffer_unordered(self.config.workers);
        futures::pin_mut!(results);

        let mut failure = None;
        while let Some(result) = results.next().await {
            if let Err(err) = result {
                stop.cancel();
                failure.get_or_insert(err);
            }
        }

        let report = *context.report.lock().await;
        self.progress.finish(&report);

        if let Some(source) = failure {
            return Err(BlockFailure { report, source });
        }
        if cancel.is_cancelled() {
            warn!(processed = report.processed_lines, "Block processing cancelled");
            return Err(BlockFailure {
                report,
                source: IngestError::Cancelled,
            });
        }

        info!(
            file_id,
            total = report.total_lines,
            stored = report.stored,
            duplicates = report.duplicates,
            malformed = report.malformed,
            rejected = report.rejected,
            "Block processing finished"
        );
        Ok(report)
    }
}

fn batches<R>(
    reader: R,
    block_size: usize,
    stop: CancellationToken,
) -> impl Stream<Item = Result<Batch>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold(Some((reader, 1u64)), move |state| {
        let stop = stop.clone();
        async move {
            let (mut reader, first_line) = state?;
            if stop.is_cancelled() {
                return None;
            }
            match read_batch(&mut reader, block_size).await {
                Ok(lines) if lines.is_empty() => None,
                Ok(lines) => {
                    let next = first_line + lines.len() as u64;
                    Some((Ok(Batch { first_line, lines }), Some((reader, next))))
                },
                Err(err) => Some((Err(IngestError::from(err)), None)),
            }
        }
    })
}

/// Up to `block_size` lines. Invalid UTF-8 is replaced rather than fatal.
async fn read_batch<R>(reader: &mut R, block_size: usize) -> std::io::Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::with_capacity(block_size);
    let mut buf = Vec::new();

    while lines.len() < block_size {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }

    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use leakvault_common::{CredentialEntry, FileStatus, NewIngestedFile};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn source(lines: &[String]) -> Cursor<Vec<u8>> {
        Cursor::new(lines.join("\n").into_bytes())
    }

    fn valid_lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://site{}.com/login:user{}:pw{}", i % 7, i, i))
            .collect()
    }

    async fn setup() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .register(&NewIngestedFile::new("dump.txt", 1, "fp"))
            .await
            .unwrap();
        (store, id)
    }

    fn processor(store: Arc<MemoryStore>, block_size: usize, workers: usize) -> BlockProcessor {
        BlockProcessor::new(
            store.clone(),
            store,
            BlockConfig {
                block_size,
                workers,
            },
        )
    }

    /// Entry store that refuses one password and fails hard after a budget
    struct FlakyStore {
        inner: MemoryStore,
        inserts: AtomicUsize,
        fail_after: usize,
    }

    #[async_trait]
    impl EntryStore for FlakyStore {
        async fn exists(&self, key: &EntryKey) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn insert(&self, entry: &NewCredentialEntry) -> Result<i64> {
            if entry.key.password == "refused" {
                return Err(IngestError::Rejected("invalid byte sequence".into()));
            }
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(IngestError::Persistence("connection reset".into()));
            }
            self.inner.insert(entry).await
        }

        async fn list(&self, file_id: i64) -> Result<Vec<CredentialEntry>> {
            self.inner.list(file_id).await
        }

        async fn count(&self, file_id: i64) -> Result<i64> {
            self.inner.count(file_id).await
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        percentages: StdMutex<Vec<f64>>,
    }

    impl ProgressSink for RecordingProgress {
        fn update(&self, report: &BlockReport) {
            self.percentages.lock().unwrap().push(report.percentage());
        }
    }

    #[tokio::test]
    async fn test_stores_every_valid_line() {
        let (store, id) = setup().await;
        let lines = valid_lines(10);

        let report = processor(store.clone(), 3, 2)
            .run(id, source(&lines), 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stored, 10);
        assert_eq!(report.batches, 4);
        assert_eq!(report.ignored(), 0);
        assert_eq!(report.percentage(), 100.0);
        assert_eq!(store.get(id).await.unwrap().processed_count, 10);
        assert_eq!(store.get(id).await.unwrap().status, FileStatus::Processing);
    }

    #[tokio::test]
    async fn test_malformed_and_duplicate_lines_are_ignored() {
        let (store, id) = setup().await;
        let lines: Vec<String> = [
            "https://a.com/login:alice:one",
            "not-a-valid-line",
            "https://a.com/login:alice:one",
            "",
            "  https://a.com/login:alice:one  ",
            "https://a.com/login:bob:two",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let report = processor(store.clone(), 2, 2)
            .run(id, source(&lines), 6, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stored, 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.ignored(), 4);
        assert_eq!(store.count(id).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_final_count_independent_of_pool_size() {
        let mut lines = valid_lines(120);
        // Every third line repeats an earlier one, across batch boundaries.
        for i in (0..120).step_by(3) {
            lines.push(lines[i].clone());
        }
        lines.push("garbage".to_string());

        for (block_size, workers) in [(1, 1), (7, 2), (16, 4), (50, 8), (1000, 3)] {
            let (store, id) = setup().await;
            let report = processor(store.clone(), block_size, workers)
                .run(id, source(&lines), lines.len() as u64, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(report.stored, 120, "block_size={block_size} workers={workers}");
            assert_eq!(report.duplicates, 40);
            assert_eq!(report.processed_lines, lines.len() as u64);
            assert_eq!(store.get(id).await.unwrap().processed_count, 120);
        }
    }

    #[tokio::test]
    async fn test_line_numbers_are_exact() {
        let (store, id) = setup().await;
        let lines = vec![
            "https://a.com:u1:p".to_string(),
            "skip me".to_string(),
            "https://a.com:u3:p".to_string(),
            "https://a.com:u4:p".to_string(),
            "https://a.com:u5:p".to_string(),
        ];

        processor(store.clone(), 2, 3)
            .run(id, source(&lines), 5, &CancellationToken::new())
            .await
            .unwrap();

        let mut stored: Vec<(String, Option<i64>)> = store
            .list(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.username, e.line))
            .collect();
        stored.sort();
        assert_eq!(
            stored,
            vec![
                ("u1".to_string(), Some(1)),
                ("u3".to_string(), Some(3)),
                ("u4".to_string(), Some(4)),
                ("u5".to_string(), Some(5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_entries_do_not_stop_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .register(&NewIngestedFile::new("dump.txt", 1, "fp"))
            .await
            .unwrap();
        let entries = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            inserts: AtomicUsize::new(0),
            fail_after: usize::MAX,
        });
        entries
            .inner
            .register(&NewIngestedFile::new("dump.txt", 1, "fp"))
            .await
            .unwrap();

        let lines: Vec<String> = vec![
            "https://a.com:u1:refused".into(),
            "https://a.com:u2:ok".into(),
        ];
        let report = BlockProcessor::new(store, entries, BlockConfig::default())
            .run(id, source(&lines), 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_remaining_batches() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .register(&NewIngestedFile::new("dump.txt", 1, "fp"))
            .await
            .unwrap();
        let entries = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            inserts: AtomicUsize::new(0),
            fail_after: 3,
        });
        entries
            .inner
            .register(&NewIngestedFile::new("dump.txt", 1, "fp"))
            .await
            .unwrap();

        let lines = valid_lines(20);
        let failure = BlockProcessor::new(
            store.clone(),
            entries.clone(),
            BlockConfig {
                block_size: 2,
                workers: 1,
            },
        )
        .run(id, source(&lines), 20, &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(failure.source, IngestError::Persistence(_)));
        assert_eq!(failure.report.stored, 3);
        assert!(failure.report.batches < 10);
        assert!(failure.report.percentage() < 100.0);
        assert_eq!(store.get(id).await.unwrap().processed_count, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (store, id) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = processor(store.clone(), 2, 2)
            .run(id, source(&valid_lines(10)), 10, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(failure.source, IngestError::Cancelled));
        assert_eq!(failure.report.stored, 0);
        assert_eq!(store.count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let (store, id) = setup().await;
        let report = processor(store, 10, 2)
            .run(id, Cursor::new(Vec::new()), 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.batches, 0);
        assert_eq!(report.percentage(), 100.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_is_monotonic() {
        let (store, id) = setup().await;
        let progress = Arc::new(RecordingProgress::default());
        let lines = valid_lines(64);

        processor(store, 4, 4)
            .with_progress(progress.clone())
            .run(id, source(&lines), 64, &CancellationToken::new())
            .await
            .unwrap();

        let seen = progress.percentages.lock().unwrap().clone();
        assert_eq!(seen.len(), 16);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(seen[..seen.len() - 1].iter().all(|p| *p < 100.0));
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let (store, id) = setup().await;
        let failure = processor(store, 0, 2)
            .run(id, source(&valid_lines(1)), 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.source, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_crlf_and_invalid_utf8() {
        let (store, id) = setup().await;
        let mut bytes = b"https://a.com:u1:p1\r\nhttps://a.com:u2:p\xff2\r\n".to_vec();
        bytes.extend_from_slice(b"https://a.com:u3:p3");

        let report = processor(store.clone(), 10, 1)
            .run(id, Cursor::new(bytes), 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stored, 3);
        let passwords: Vec<String> =
            store.list(id).await.unwrap().into_iter().map(|e| e.password).collect();
        assert!(passwords.contains(&"p1".to_string()));
        assert!(passwords.contains(&"p\u{fffd}2".to_string()));
    }
}
