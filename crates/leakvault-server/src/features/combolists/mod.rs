pub mod commands;
pub mod repository;
pub mod routes;

pub use commands::{BulkUploadCommand, BulkUploadError, BulkUploadResponse};
pub use repository::{
    MemorySubmissionRepository, PgSubmissionRepository, SubmissionMetadata, SubmissionRecord,
    SubmissionRepository,
};
pub use routes::combolists_routes;
