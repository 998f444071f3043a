use silo_blob::{BlobStore, FsBlobStore, InMemoryBlobStore};
use silo_crypto::ContentHasher;
use silo_records::{RecordStore, Transaction};
use silo_types::{BlobLocation, FileId, FileRecord, FileRole, Standing};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SiloConfig;
use crate::error::{EngineError, EngineResult};

/// The deduplication engine.
///
/// Owns the record store and the blob store and enforces, across every
/// operation, that each content hash has at most one canonical file and
/// that every duplicate points at it through exactly one reference.
///
/// `Silo` is `Sync`; share it across worker threads behind an `Arc`.
/// Constructing one has no side effects on stored state. Consistency repair
/// only happens when [`audit_consistency`](Self::audit_consistency) is
/// called.
pub struct Silo<B: BlobStore> {
    pub(crate) records: RecordStore,
    pub(crate) blobs: B,
    pub(crate) hasher: ContentHasher,
}

/// A file record with its resolved role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileView {
    pub record: FileRecord,
    pub role: FileRole,
}

impl<B: BlobStore> Silo<B> {
    pub fn new(records: RecordStore, blobs: B) -> Self {
        Self {
            records,
            blobs,
            hasher: ContentHasher::CONTENT,
        }
    }

    /// Replace the content hasher (e.g. a different read chunk size).
    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Look up a file and resolve its role from the stored rows.
    ///
    /// A duplicate without a reference cannot be expressed as a role. When
    /// one is found the consistency auditor runs and the lookup is retried;
    /// [`EngineError::InconsistentState`] is returned only if the repair did
    /// not help.
    pub fn file(&self, id: &FileId) -> EngineResult<FileView> {
        let record = self.records.file(id)?.ok_or(EngineError::NotFound(*id))?;
        if let Some(view) = self.resolve(record)? {
            return Ok(view);
        }

        warn!(file = %id, "duplicate has no reference; running consistency audit");
        let report = self.audit_consistency()?;
        debug!(file = %id, fixed = report.fixed_count, "audit finished; resolving again");
        let record = self.records.file(id)?.ok_or(EngineError::NotFound(*id))?;
        self.resolve(record)?.ok_or_else(|| {
            EngineError::InconsistentState(format!(
                "duplicate {id} has no reference to a canonical file"
            ))
        })
    }

    /// `None` for a duplicate whose reference is missing.
    fn resolve(&self, record: FileRecord) -> EngineResult<Option<FileView>> {
        let role = match record.standing {
            Standing::Canonical => FileRole::Canonical {
                duplicates: self
                    .records
                    .references_to(&record.id)?
                    .into_iter()
                    .map(|r| r.duplicate)
                    .collect(),
            },
            Standing::Duplicate => match self.records.references_from(&record.id)?.first() {
                Some(reference) => FileRole::Duplicate {
                    canonical: reference.canonical,
                    reference: reference.id,
                },
                None => return Ok(None),
            },
        };
        Ok(Some(FileView { record, role }))
    }

    /// Every file record, ordered by creation anchor then id.
    pub fn files(&self) -> EngineResult<Vec<FileRecord>> {
        Ok(self.records.files()?)
    }

    /// Read a file's bytes from the blob store.
    pub fn read(&self, id: &FileId) -> EngineResult<Vec<u8>> {
        let record = self.records.file(id)?.ok_or(EngineError::NotFound(*id))?;
        match self.blobs.get(&record.location)? {
            Some(bytes) => Ok(bytes),
            None => {
                warn!(file = %id, location = %record.location, "blob missing for file");
                Err(EngineError::StorageUnavailable(silo_blob::BlobError::Missing(
                    record.location,
                )))
            }
        }
    }

    /// Compact the record journal. Returns `false` when the store is
    /// volatile.
    pub fn compact(&self) -> EngineResult<bool> {
        Ok(self.records.compact()?)
    }

    /// Delete `location` from the blob store unless a committed record still
    /// names it. Runs while `tx` holds its lock. Failures are logged and
    /// reported as "not released".
    pub(crate) fn release_blob(&self, tx: &Transaction<'_>, location: &BlobLocation) -> bool {
        match tx.location_committed(location) {
            Ok(true) => {
                debug!(%location, "blob still referenced; keeping");
                false
            }
            Ok(false) => match self.blobs.delete(location) {
                Ok(existed) => {
                    debug!(%location, existed, "blob released");
                    existed
                }
                Err(e) => {
                    warn!(%location, error = %e, "blob cleanup failed");
                    false
                }
            },
            Err(e) => {
                warn!(%location, error = %e, "could not check blob usage; keeping");
                false
            }
        }
    }
}

impl Silo<InMemoryBlobStore> {
    /// Volatile engine for tests and embedding.
    pub fn in_memory() -> Self {
        Self::new(RecordStore::in_memory(), InMemoryBlobStore::new())
    }
}

impl Silo<Box<dyn BlobStore>> {
    /// Build an engine from configuration: journaled records when a journal
    /// path is set, filesystem blobs when a blob root is set.
    pub fn open(config: &SiloConfig) -> EngineResult<Self> {
        let records = RecordStore::open(&config.records)?;
        let blobs: Box<dyn BlobStore> = match &config.blobs.root {
            Some(root) => Box::new(FsBlobStore::open(root)?),
            None => Box::new(InMemoryBlobStore::new()),
        };
        info!(
            durable = records.is_durable(),
            blob_root = ?config.blobs.root,
            "silo opened"
        );
        let hasher = ContentHasher::CONTENT.with_buffer_size(config.ingest.read_buffer_size);
        Ok(Self::new(records, blobs).with_hasher(hasher))
    }
}

impl<B: BlobStore> std::fmt::Debug for Silo<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Silo")
            .field("records", &self.records)
            .field("hasher", &self.hasher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FileMetadata;
    use std::io::Cursor;

    #[test]
    fn file_view_resolves_roles() {
        let silo = Silo::in_memory();
        let first = silo
            .ingest(Some(&mut Cursor::new(b"AAAA".to_vec())), FileMetadata::new("a.txt", "text/plain"))
            .unwrap();
        let second = silo
            .ingest(Some(&mut Cursor::new(b"AAAA".to_vec())), FileMetadata::new("b.txt", "text/plain"))
            .unwrap();

        let canonical = silo.file(&first.file.id).unwrap();
        assert_eq!(
            canonical.role,
            FileRole::Canonical {
                duplicates: vec![second.file.id]
            }
        );
        let duplicate = silo.file(&second.file.id).unwrap();
        assert_eq!(duplicate.role.canonical_id(), Some(first.file.id));
    }

    #[test]
    fn read_returns_shared_bytes() {
        let silo = Silo::in_memory();
        let a = silo
            .ingest(Some(&mut Cursor::new(b"shared".to_vec())), FileMetadata::new("a", "x"))
            .unwrap();
        let b = silo
            .ingest(Some(&mut Cursor::new(b"shared".to_vec())), FileMetadata::new("b", "x"))
            .unwrap();
        assert_eq!(silo.read(&a.file.id).unwrap(), b"shared");
        assert_eq!(silo.read(&b.file.id).unwrap(), b"shared");
        assert_eq!(silo.blobs().len(), 1);
    }

    #[test]
    fn missing_blob_is_storage_unavailable() {
        let silo = Silo::in_memory();
        let outcome = silo
            .ingest(Some(&mut Cursor::new(b"gone".to_vec())), FileMetadata::new("g", "x"))
            .unwrap();
        silo.blobs().delete(&outcome.file.location).unwrap();
        let err = silo.read(&outcome.file.id).unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn orphaned_duplicate_is_repaired_on_lookup() {
        let silo = Silo::in_memory();
        let canonical = silo
            .ingest(Some(&mut Cursor::new(b"AAAA".to_vec())), FileMetadata::new("a", "x"))
            .unwrap()
            .file;
        let dup = silo
            .ingest(Some(&mut Cursor::new(b"AAAA".to_vec())), FileMetadata::new("b", "x"))
            .unwrap()
            .file;
        {
            let mut tx = silo
                .records()
                .begin(silo_records::LockScope::HashGroup(*dup.content_hash()))
                .unwrap();
            let edge = tx.references_from(&dup.id)[0].id;
            tx.delete_reference(edge).unwrap();
            tx.commit().unwrap();
        }

        let view = silo.file(&dup.id).unwrap();
        assert_eq!(view.role.canonical_id(), Some(canonical.id));
        assert_eq!(silo.records().references_from(&dup.id).unwrap().len(), 1);
        assert_eq!(silo.file(&dup.id).unwrap(), view);
        assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
    }

    #[test]
    fn unknown_file_is_not_found() {
        let silo = Silo::in_memory();
        let id = FileId::new();
        assert!(matches!(silo.file(&id), Err(EngineError::NotFound(missing)) if missing == id));
        assert!(matches!(silo.read(&id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn open_from_config_uses_filesystem_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SiloConfig::default();
        config.records.journal_path = Some(dir.path().join("records.journal"));
        config.blobs.root = Some(dir.path().join("blobs"));

        let id = {
            let silo = Silo::open(&config).unwrap();
            silo.ingest(Some(&mut Cursor::new(b"durable".to_vec())), FileMetadata::new("d", "x"))
                .unwrap()
                .file
                .id
        };
        let silo = Silo::open(&config).unwrap();
        assert_eq!(silo.read(&id).unwrap(), b"durable");
        assert!(silo.compact().unwrap());
    }
}
