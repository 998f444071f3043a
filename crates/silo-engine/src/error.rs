use silo_blob::BlobError;
use silo_records::RecordError;
use silo_types::FileId;
use thiserror::Error;

/// Errors surfaced by the deduplication engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller error. Retrying the same call fails the same way.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Deleting a canonical file that still has duplicates needs explicit
    /// consent to promote one of them.
    #[error(
        "file {file} is canonical for {} duplicate(s); resubmit with promotion confirmed",
        duplicate_ids.len()
    )]
    ConflictRequiresConfirmation {
        file: FileId,
        duplicate_ids: Vec<FileId>,
        duplicate_names: Vec<String>,
    },

    /// Blob I/O failed. The transaction was aborted and may be retried.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] BlobError),

    /// Rows violate an invariant the auditor is responsible for.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("file not found: {0}")]
    NotFound(FileId),

    #[error("record store error: {0}")]
    Records(#[from] RecordError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StorageUnavailable(_) => true,
            Self::Records(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
