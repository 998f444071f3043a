//! Shared fixtures for the engine's unit tests.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use silo_blob::{BlobError, BlobResult, BlobStore, InMemoryBlobStore};
use silo_types::BlobLocation;

use crate::engine::Silo;
use crate::ingest::{FileMetadata, IngestOutcome};

pub fn ingest_bytes<B: BlobStore>(silo: &Silo<B>, data: &[u8], name: &str) -> IngestOutcome {
    silo.ingest(
        Some(&mut Cursor::new(data.to_vec())),
        FileMetadata::new(name, "application/octet-stream"),
    )
    .unwrap()
}

pub fn ingest_typed<B: BlobStore>(
    silo: &Silo<B>,
    data: &[u8],
    name: &str,
    media_type: &str,
) -> IngestOutcome {
    silo.ingest(
        Some(&mut Cursor::new(data.to_vec())),
        FileMetadata::new(name, media_type),
    )
    .unwrap()
}

/// In-memory blob store whose writes or deletes can be switched off.
#[derive(Default)]
pub struct FailingBlobStore {
    inner: InMemoryBlobStore,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FailingBlobStore {
    pub fn failing_puts() -> Self {
        let store = Self::default();
        store.fail_puts.store(true, Ordering::SeqCst);
        store
    }

    pub fn inner(&self) -> &InMemoryBlobStore {
        &self.inner
    }
}

impl BlobStore for FailingBlobStore {
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::ReadOnly);
        }
        self.inner.put(content)
    }

    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>> {
        self.inner.get(location)
    }

    fn delete(&self, location: &BlobLocation) -> BlobResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::ReadOnly);
        }
        self.inner.delete(location)
    }

    fn exists(&self, location: &BlobLocation) -> BlobResult<bool> {
        self.inner.exists(location)
    }
}
