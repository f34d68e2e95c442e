//! Bulk upload command
//!
//! Resolves the submission's metadata row by hash (fetch, else
//! insert-or-fetch) and then inserts every data record under it. Replaying
//! the same submission resolves to the same metadata row and adds nothing.
//!
//! Records are inserted one by one; the first storage error stops the loop
//! and is returned with the number of records already committed. Committed
//! records are not rolled back since each is deduplicated on replay.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use leakvault_common::fingerprint::supplied_fingerprint;
use leakvault_common::IngestError;

use crate::error::AppError;
use crate::features::combolists::repository::{
    SubmissionMetadata, SubmissionRecord, SubmissionRepository,
};

/// Command to store one agent submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkUploadCommand {
    /// Content hash identifying the submission
    pub hash: String,

    #[serde(default)]
    pub metadata: SubmissionMetadata,

    #[serde(default)]
    pub data: Vec<SubmissionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUploadResponse {
    pub metadata_id: i64,
    /// Whether the metadata row already existed before this call
    pub metadata_reused: bool,
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BulkUploadError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Failed to resolve submission metadata: {0}")]
    Metadata(#[source] IngestError),

    #[error("Record {index} failed after {inserted} inserts: {source}")]
    Record {
        index: usize,
        inserted: usize,
        #[source]
        source: IngestError,
    },
}

impl From<BulkUploadError> for AppError {
    fn from(err: BulkUploadError) -> Self {
        match err {
            BulkUploadError::Validation(message) => AppError::BadRequest(message),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl BulkUploadCommand {
    /// Normalise the hash. An empty hash cannot identify a submission.
    pub fn validate(&mut self) -> Result<(), BulkUploadError> {
        self.hash = supplied_fingerprint(&self.hash).map_err(|e| match e {
            IngestError::MalformedInput(message) => BulkUploadError::Validation(message),
            other => BulkUploadError::Validation(other.to_string()),
        })?;
        Ok(())
    }
}

#[tracing::instrument(
    skip(repo, command),
    fields(hash = %command.hash, records = command.data.len())
)]
pub async fn handle(
    repo: &dyn SubmissionRepository,
    mut command: BulkUploadCommand,
) -> Result<BulkUploadResponse, BulkUploadError> {
    command.validate()?;

    let existing = repo
        .find_metadata(&command.hash)
        .await
        .map_err(BulkUploadError::Metadata)?;

    let (metadata_id, metadata_reused) = match existing {
        Some(id) => (id, true),
        None => {
            let id = repo
                .insert_metadata(&command.hash, &command.metadata)
                .await
                .map_err(BulkUploadError::Metadata)?;
            (id, false)
        },
    };
    debug!(metadata_id, metadata_reused, "Submission metadata resolved");

    let mut inserted = 0;
    let mut duplicates = 0;
    for (index, record) in command.data.iter().enumerate() {
        match repo.insert_record(metadata_id, record).await {
            Ok(true) => inserted += 1,
            Ok(false) => duplicates += 1,
            Err(source) => {
                return Err(BulkUploadError::Record {
                    index,
                    inserted,
                    source,
                })
            },
        }
    }

    info!(metadata_id, inserted, duplicates, "Submission stored");

    Ok(BulkUploadResponse {
        metadata_id,
        metadata_reused,
        received: command.data.len(),
        inserted,
        duplicates,
    })
}
