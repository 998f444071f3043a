use silo_types::BlobLocation;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The location does not have the shape this backend issues.
    #[error("malformed blob location: {0}")]
    MalformedLocation(BlobLocation),

    /// A location string could not be constructed.
    #[error("invalid location: {0}")]
    Location(#[from] silo_types::TypeError),

    /// Hashing the incoming stream failed.
    #[error("hashing failed: {0}")]
    Hash(#[from] silo_crypto::HasherError),

    /// Nothing is stored at a location a record still names.
    #[error("blob missing at {0}")]
    Missing(BlobLocation),

    /// A lock guarding in-memory state was poisoned by a panicking writer.
    #[error("blob store lock poisoned")]
    Poisoned,

    /// Storage backend is read-only or otherwise refusing writes.
    #[error("blob store is read-only")]
    ReadOnly,
}

/// Result alias for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;
