//! Agent stream channel
//!
//! Agents hold a TCP connection open and send newline-delimited JSON
//! [`Frame`]s. Each connection is split in two:
//!
//! - a read task that decodes lines (bounded length) and pushes them into a
//!   bounded queue, so a slow store slows the socket down instead of piling
//!   up frames in memory
//! - a dispatcher that admits frames to a semaphore-bounded worker pool
//!
//! File frames are sequencing points: the dispatcher waits for in-flight
//! entries to finish, registers the file, then resumes, so entries sent after
//! a file frame always find their file.
//!
//! Every frame is checked by the [`AgentGate`]. Frames that fail parsing,
//! authorization or a per-row storage check are logged and dropped; the
//! connection stays open. A fatal storage error (see
//! [`IngestError::is_fatal`]) stops reading, drains in-flight frames and
//! closes the connection with [`ConnectionReport::fatal`] set.

pub mod frame;

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use leakvault_common::fingerprint::supplied_fingerprint;
use leakvault_common::{EntryKey, IngestError, NewCredentialEntry, NewIngestedFile, Result};
use leakvault_ingest::storage::{EntryStore, FileRegistry};

use crate::config::StreamConfig;
use crate::features::agents::AgentGate;

pub use frame::{Frame, COMBOLIST_AGENT};

/// Collaborators shared by every connection
#[derive(Clone)]
pub struct StreamContext {
    pub gate: AgentGate,
    pub registry: Arc<dyn FileRegistry>,
    pub entries: Arc<dyn EntryStore>,
    pub platform: String,
}

/// Per-connection limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub queue_size: usize,
    pub workers: usize,
    pub max_frame_bytes: usize,
}

impl From<&StreamConfig> for StreamLimits {
    fn from(config: &StreamConfig) -> Self {
        Self {
            queue_size: config.queue_size.max(1),
            workers: config.workers.max(1),
            max_frame_bytes: config.max_frame_bytes.max(1),
        }
    }
}

/// What happened to one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    FileRegistered(i64),
    EntryStored(i64),
    /// The entry is committed but its counters hit a fatal storage error
    EntryStoredCountersLost(i64),
    Duplicate,
}

/// Counters for one connection, logged when it closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    pub frames: u64,
    pub files: u64,
    pub entries: u64,
    pub duplicates: u64,
    pub dropped: u64,
    /// The connection was closed because a line exceeded the frame limit
    pub oversized: bool,
    /// The connection was closed after a fatal storage error
    pub fatal: bool,
}

impl ConnectionReport {
    /// Count one frame's outcome. Returns `true` when the connection must
    /// stop taking frames.
    fn record(&mut self, result: Result<FrameOutcome>) -> bool {
        let fatal = match result {
            Ok(FrameOutcome::FileRegistered(_)) => {
                self.files += 1;
                false
            },
            Ok(FrameOutcome::EntryStored(_)) => {
                self.entries += 1;
                false
            },
            Ok(FrameOutcome::EntryStoredCountersLost(_)) => {
                self.entries += 1;
                true
            },
            Ok(FrameOutcome::Duplicate) => {
                self.duplicates += 1;
                false
            },
            Err(err) if err.is_duplicate() => {
                debug!(error = %err, "Duplicate frame");
                self.duplicates += 1;
                false
            },
            Err(err @ IngestError::Unauthorized(_)) => {
                warn!(reason = %err, "Frame not authorized");
                self.dropped += 1;
                false
            },
            Err(err) if err.is_fatal() => {
                error!(error = %err, "Storage failure, closing connection");
                self.dropped += 1;
                true
            },
            Err(err) => {
                warn!(error = %err, "Frame dropped");
                self.dropped += 1;
                false
            },
        };
        self.fatal |= fatal;
        fatal
    }
}

/// Accept agent connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    context: StreamContext,
    limits: StreamLimits,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Agent stream listening");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer)) => {
                let context = context.clone();
                let shutdown = shutdown.child_token();
                let span = tracing::info_span!("agent_connection", id = %Uuid::new_v4(), %peer);
                tokio::spawn(
                    async move {
                        info!("Agent connected");
                        let report =
                            handle_connection(socket, Some(peer), context, limits, shutdown).await;
                        info!(
                            frames = report.frames,
                            files = report.files,
                            entries = report.entries,
                            duplicates = report.duplicates,
                            dropped = report.dropped,
                            oversized = report.oversized,
                            fatal = report.fatal,
                            "Agent disconnected"
                        );
                    }
                    .instrument(span),
                );
            },
            Err(e) => {
                warn!(error = %e, "Failed to accept agent connection");
            },
        }
    }

    info!("Agent stream stopped");
    Ok(())
}

/// Drive one connection to completion and report what it carried.
pub async fn handle_connection<S>(
    socket: S,
    peer: Option<SocketAddr>,
    context: StreamContext,
    limits: StreamLimits,
    shutdown: CancellationToken,
) -> ConnectionReport
where
    S: AsyncRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(limits.queue_size);
    let stop_reading = shutdown.child_token();
    let reader = tokio::spawn(
        read_frames(socket, tx, limits.max_frame_bytes, stop_reading.clone()).in_current_span(),
    );

    let peer_ip = peer.map(|addr| addr.ip().to_string());
    let semaphore = Arc::new(Semaphore::new(limits.workers));
    let mut workers: JoinSet<Result<FrameOutcome>> = JoinSet::new();
    let mut report = ConnectionReport::default();

    'frames: while let Some(line) = rx.recv().await {
        report.frames += 1;

        let frame = match Frame::parse(&line) {
            Ok(frame) => frame,
            Err(err) => {
                report.record(Err(err));
                continue;
            },
        };

        if frame.is_file() {
            while let Some(joined) = workers.join_next().await {
                if report.record(flatten(joined)) {
                    break 'frames;
                }
            }
            if report.record(dispatch(&context, frame, peer_ip.as_deref()).await) {
                break;
            }
            continue;
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let context = context.clone();
        let peer_ip = peer_ip.clone();
        workers.spawn(
            async move {
                let result = dispatch(&context, frame, peer_ip.as_deref()).await;
                drop(permit);
                result
            }
            .in_current_span(),
        );

        while let Some(joined) = workers.try_join_next() {
            if report.record(flatten(joined)) {
                break 'frames;
            }
        }
    }

    // Stop the reader, then let frames already handed to workers finish
    stop_reading.cancel();
    drop(rx);
    while let Some(joined) = workers.join_next().await {
        report.record(flatten(joined));
    }

    match reader.await {
        Ok(oversized) => report.oversized = oversized,
        Err(e) => error!(error = %e, "Frame reader task failed"),
    }
    report
}

fn flatten(joined: std::result::Result<Result<FrameOutcome>, tokio::task::JoinError>) -> Result<FrameOutcome> {
    joined.map_err(|e| IngestError::Persistence(format!("frame worker failed: {}", e)))?
}

/// Read lines into `tx` until EOF, shutdown or an oversized line. Returns
/// whether the connection was cut for exceeding the frame limit.
async fn read_frames<S>(
    socket: S,
    tx: mpsc::Sender<String>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> bool
where
    S: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(socket, LinesCodec::new_with_max_length(max_frame_bytes));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return false,
            next = lines.next() => next,
        };

        match next {
            None => return false,
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    return false;
                }
            },
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(max_frame_bytes, "Frame exceeds size limit, closing connection");
                return true;
            },
            Some(Err(LinesCodecError::Io(e))) => {
                warn!(error = %e, "Agent connection read failed");
                return false;
            },
        }
    }
}

/// Authorize and apply one frame.
#[tracing::instrument(skip_all, fields(kind = frame.kind()))]
pub async fn dispatch(
    context: &StreamContext,
    frame: Frame,
    peer_ip: Option<&str>,
) -> Result<FrameOutcome> {
    let agent = context
        .gate
        .authorize(frame.agent_key(), &context.platform)
        .await?;

    match frame {
        Frame::File { agent_key, raw, .. } => {
            context.gate.touch(&agent_key, peer_ip).await?;

            let info = raw.file;
            let fingerprint = supplied_fingerprint(&info.hash)?;
            if info.name.trim().is_empty() {
                return Err(IngestError::MalformedInput("file name is empty".to_string()));
            }

            let file = NewIngestedFile::new(info.name.trim(), info.size, fingerprint)
                .with_source(info.source)
                .with_description(info.description)
                .with_file_type(info.file_type.to_lowercase())
                .with_agent_key(agent_key);
            let file_id = context.registry.register(&file).await?;

            info!(file_id, agent_id = agent.id, name = %file.name, "File registered over stream");
            Ok(FrameOutcome::FileRegistered(file_id))
        },
        Frame::Entry {
            agent_key, hash, raw, ..
        } => {
            let fingerprint = supplied_fingerprint(&hash)?;
            let file_id = context.registry.lookup(&fingerprint).await?;

            let key = EntryKey::new(
                file_id,
                &raw.url_entrie.url,
                &raw.user_entrie.username,
                &raw.user_entrie.password,
            );
            if key.url.is_empty() || key.username.is_empty() {
                return Err(IngestError::MalformedInput(
                    "entry needs a url and a username".to_string(),
                ));
            }

            let entry_id = match context.entries.insert(&NewCredentialEntry::new(key)).await {
                Ok(entry_id) => entry_id,
                Err(err) if err.is_duplicate() => return Ok(FrameOutcome::Duplicate),
                Err(err) => return Err(err),
            };

            // The entry is committed from here on; counter failures are
            // logged and never turn it into a dropped frame
            let mut counters_lost = false;
            if let Err(err) = context.registry.add_processed(file_id, 1).await {
                error!(entry_id, file_id, error = %err, "Failed to update file processed counter");
                counters_lost |= err.is_fatal();
            }
            if let Err(err) = context.gate.record_processed(&agent_key, 1).await {
                error!(entry_id, agent_id = agent.id, error = %err, "Failed to update agent processed counter");
                counters_lost |= err.is_fatal();
            }

            if counters_lost {
                Ok(FrameOutcome::EntryStoredCountersLost(entry_id))
            } else {
                Ok(FrameOutcome::EntryStored(entry_id))
            }
        },
    }
}
