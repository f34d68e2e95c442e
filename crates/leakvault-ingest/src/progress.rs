//! Progress reporting for the block processor
//!
//! The processor publishes a [`BlockReport`] snapshot after every batch. The
//! operator tool renders it with an indicatif bar; library callers can log it
//! or ignore it.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

/// Counters accumulated over one run of the block processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    /// Lines in the source, from the counting pass
    pub total_lines: u64,
    /// Lines whose batch has finished
    pub processed_lines: u64,
    /// Entries committed to the store
    pub stored: u64,
    pub duplicates: u64,
    /// Lines the extractor did not match
    pub malformed: u64,
    /// Entries the store refused for reasons other than duplication
    pub rejected: u64,
    pub batches: u64,
}

impl BlockReport {
    /// Lines that did not produce a stored entry
    pub fn ignored(&self) -> u64 {
        self.processed_lines.saturating_sub(self.stored)
    }

    /// Share of lines processed, in `0.0..=100.0`.
    pub fn percentage(&self) -> f64 {
        if self.total_lines == 0 {
            return 100.0;
        }
        let ratio = self.processed_lines as f64 / self.total_lines as f64;
        (ratio * 100.0).min(100.0)
    }
}

/// Receiver of progress snapshots. Must be cheap; it runs on worker tasks.
pub trait ProgressSink: Send + Sync {
    fn start(&self, _total_lines: u64) {}

    fn update(&self, report: &BlockReport);

    fn finish(&self, _report: &BlockReport) {}
}

/// Discards every snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _report: &BlockReport) {}
}

/// Emits one tracing event per batch
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&self, report: &BlockReport) {
        info!(
            percentage = report.percentage(),
            total = report.total_lines,
            processed = report.stored,
            ignored = report.ignored(),
            "Batch finished"
        );
    }
}

/// Console progress bar for the operator tool
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn start(&self, total_lines: u64) {
        self.bar.set_length(total_lines);
        self.bar.set_message(format!("total lines: {}", total_lines));
    }

    fn update(&self, report: &BlockReport) {
        self.bar.set_position(report.processed_lines);
        self.bar.set_message(summary_line(report));
    }

    fn finish(&self, report: &BlockReport) {
        self.bar.set_position(report.processed_lines);
        self.bar.finish_with_message(summary_line(report));
    }
}

/// `percentage`, `total lines`, `processed` and `ignored` on one line
pub fn summary_line(report: &BlockReport) -> String {
    format!(
        "{:.2}% | total lines: {} | processed: {} | ignored: {}",
        report.percentage(),
        report.total_lines,
        report.stored,
        report.ignored()
    )
}

/// Human-readable byte size, e.g. `1.50 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
