use silo_types::{ContentHash, FileId, ReferenceId, TypeError};

/// Errors produced by the record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("file record not found: {0}")]
    FileNotFound(FileId),

    #[error("file reference not found: {0}")]
    ReferenceNotFound(ReferenceId),

    #[error("row already exists: {0}")]
    DuplicateRow(String),

    /// A write touched a hash group the transaction does not hold.
    #[error("hash group {hash} is outside transaction scope {scope}")]
    OutOfScope { scope: String, hash: ContentHash },

    #[error("timed out after {waited_ms}ms waiting for lock on {scope}")]
    LockTimeout { scope: String, waited_ms: u64 },

    #[error("record store lock poisoned")]
    Poisoned,

    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl RecordError {
    /// Lock timeouts are transient; everything else needs a different call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Result alias for record store operations.
pub type RecordResult<T> = Result<T, RecordError>;
