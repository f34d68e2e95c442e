//! Leakvault Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the leakvault workspace.
//!
//! # Overview
//!
//! This crate provides the functionality used by both ingestion channels:
//!
//! - **Error Handling**: The ingestion error taxonomy and result alias
//! - **Extraction**: Turning one combolist line into a credential triple
//! - **Fingerprints**: Content addressing for files and submissions
//! - **Logging**: Tracing subscriber setup shared by every binary
//! - **Types**: Domain records (files, entries, agents)
//!
//! # Example
//!
//! ```no_run
//! use leakvault_common::extract::extract_entry;
//!
//! let entry = extract_entry("https://example.com/login:alice:secret123");
//! assert!(entry.is_some());
//! ```

pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{IngestError, Result};
pub use extract::{extract_entry, ExtractedEntry};
pub use types::{
    AgentStatus, CredentialEntry, EntryKey, FileStatus, IngestedFile, NewCredentialEntry,
    NewIngestedFile,
};
