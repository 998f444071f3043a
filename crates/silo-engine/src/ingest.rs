use std::io::{self, Read, Seek};

use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::{LockScope, Transaction};
use silo_types::{BlobLocation, ContentHash, FileId, FileRecord, FileReference, Standing};
use tracing::{debug, warn};

use crate::engine::Silo;
use crate::error::{EngineError, EngineResult};

/// A rewindable upload stream.
pub trait ContentSource: Read + Seek {}

impl<T: Read + Seek> ContentSource for T {}

/// Client-supplied, cosmetic attributes of an upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub display_name: String,
    pub media_type: String,
    /// Size the client claims; checked against the bytes actually read.
    pub declared_size: Option<u64>,
}

impl FileMetadata {
    pub fn new(display_name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            media_type: media_type.into(),
            declared_size: None,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Result of one ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub file: FileRecord,
    pub is_duplicate: bool,
    /// The canonical this upload was attached to, for duplicates.
    pub canonical_id: Option<FileId>,
}

/// Exposes a `ContentSource` as a plain reader for the blob store.
struct Upload<'a>(&'a mut dyn ContentSource);

impl Read for Upload<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<B: BlobStore> Silo<B> {
    /// Store an upload, deduplicating against existing content.
    ///
    /// The stream is hashed once, rewound, and handed to the blob store
    /// inside a transaction holding the content's hash-group lock. Uploads
    /// of the same content therefore serialize: the first committer becomes
    /// canonical and every later one attaches to it as a duplicate.
    ///
    /// `None` means no stream was supplied at all and is rejected; an
    /// empty stream is an ordinary upload.
    pub fn ingest(
        &self,
        content: Option<&mut dyn ContentSource>,
        metadata: FileMetadata,
    ) -> EngineResult<IngestOutcome> {
        let content =
            content.ok_or_else(|| EngineError::InvalidInput("no content stream supplied".into()))?;
        let digest = self
            .hasher
            .hash_seekable(&mut *content)
            .map_err(silo_blob::BlobError::from)?;
        if let Some(declared) = metadata.declared_size {
            if declared != digest.size {
                return Err(EngineError::InvalidInput(format!(
                    "declared size {declared} does not match content size {}",
                    digest.size
                )));
            }
        }

        let mut tx = self.records.begin(LockScope::HashGroup(digest.hash))?;
        let (canonical, several_canonicals) = {
            let canonicals = tx.canonicals(&digest.hash);
            if canonicals.len() > 1 {
                warn!(
                    hash = %digest.hash,
                    count = canonicals.len(),
                    "several canonical files share a hash; attaching to the earliest"
                );
            }
            (canonicals.first().map(|f| f.id), canonicals.len() > 1)
        };

        let location = self.blobs.put(&mut Upload(content))?;
        let written = write_rows(&mut tx, location.clone(), &metadata, digest, canonical)
            .and_then(|file| {
                tx.commit()?;
                Ok(file)
            });

        match written {
            Ok(file) => {
                // The audit takes the exclusive lock; release the group first.
                drop(tx);
                if several_canonicals {
                    self.repair_after_ingest(&digest.hash);
                }
                debug!(
                    file = %file.id,
                    hash = %digest.hash,
                    size = digest.size,
                    duplicate = canonical.is_some(),
                    "ingested"
                );
                Ok(IngestOutcome {
                    file,
                    is_duplicate: canonical.is_some(),
                    canonical_id: canonical,
                })
            }
            Err(e) => {
                warn!(hash = %digest.hash, error = %e, "ingest aborted");
                self.release_blob(&tx, &location);
                Err(e.into())
            }
        }
    }
}

impl<B: BlobStore> Silo<B> {
    /// The upload itself succeeded; a failed repair is only logged.
    fn repair_after_ingest(&self, hash: &ContentHash) {
        match self.audit_consistency() {
            Ok(report) => debug!(%hash, fixed = report.fixed_count, "repaired after ingest"),
            Err(e) => warn!(%hash, error = %e, "consistency audit after ingest failed"),
        }
    }
}

fn write_rows(
    tx: &mut Transaction<'_>,
    location: BlobLocation,
    metadata: &FileMetadata,
    digest: silo_crypto::Digest,
    canonical: Option<FileId>,
) -> silo_records::RecordResult<FileRecord> {
    let standing = match canonical {
        Some(_) => Standing::Duplicate,
        None => Standing::Canonical,
    };
    let file = FileRecord::new(
        location,
        metadata.display_name.clone(),
        metadata.media_type.clone(),
        digest.hash,
        digest.size,
        tx.next_anchor()?,
        standing,
    );
    tx.insert_file(file.clone())?;
    if let Some(canonical) = canonical {
        tx.insert_reference(FileReference::new(canonical, file.id, tx.next_anchor()?)?)?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ingest_bytes, FailingBlobStore};
    use silo_records::RecordStore;
    use std::io::{Cursor, SeekFrom};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_upload_is_canonical() {
        let silo = Silo::in_memory();
        let outcome = ingest_bytes(&silo, b"AAAA", "a.txt");
        assert!(!outcome.is_duplicate);
        assert!(outcome.canonical_id.is_none());
        assert!(outcome.file.is_canonical());
        assert_eq!(outcome.file.size(), 4);
    }

    #[test]
    fn second_upload_is_a_duplicate_of_the_first() {
        let silo = Silo::in_memory();
        let first = ingest_bytes(&silo, b"AAAA", "a.txt");
        let second = ingest_bytes(&silo, b"AAAA", "b.txt");
        assert!(second.is_duplicate);
        assert_eq!(second.canonical_id, Some(first.file.id));
        assert_eq!(second.file.location, first.file.location);

        let refs = silo.records().references_from(&second.file.id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].canonical, first.file.id);
    }

    #[test]
    fn different_content_is_independent() {
        let silo = Silo::in_memory();
        let a = ingest_bytes(&silo, b"AAAA", "a");
        let b = ingest_bytes(&silo, b"BBBB", "b");
        assert!(a.file.is_canonical() && b.file.is_canonical());
        assert_eq!(silo.blobs().len(), 2);
    }

    #[test]
    fn empty_uploads_deduplicate() {
        let silo = Silo::in_memory();
        let first = ingest_bytes(&silo, b"", "empty-1");
        let second = ingest_bytes(&silo, b"", "empty-2");
        assert!(first.file.is_canonical());
        assert_eq!(first.file.size(), 0);
        assert!(second.is_duplicate);
    }

    #[test]
    fn missing_stream_is_invalid_input() {
        let silo = Silo::in_memory();
        let err = silo
            .ingest(None, FileMetadata::new("nothing", "x"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(silo.files().unwrap().is_empty());
    }

    #[test]
    fn declared_size_must_match() {
        let silo = Silo::in_memory();
        let err = silo
            .ingest(
                Some(&mut Cursor::new(b"abc".to_vec())),
                FileMetadata::new("a", "x").with_declared_size(4),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(silo.blobs().is_empty());
    }

    #[test]
    fn partially_read_stream_is_hashed_in_full() {
        let silo = Silo::in_memory();
        let mut cursor = Cursor::new(b"Small file content".to_vec());
        cursor.seek(SeekFrom::Start(6)).unwrap();
        let outcome = silo
            .ingest(Some(&mut cursor), FileMetadata::new("s", "x"))
            .unwrap();
        assert_eq!(outcome.file.size(), 18);
        assert_eq!(silo.read(&outcome.file.id).unwrap(), b"Small file content");
    }

    #[test]
    fn blob_failure_leaves_no_record() {
        let silo = Silo::new(RecordStore::in_memory(), FailingBlobStore::failing_puts());
        let err = silo
            .ingest(Some(&mut Cursor::new(b"data".to_vec())), FileMetadata::new("d", "x"))
            .unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert!(silo.files().unwrap().is_empty());
    }

    #[test]
    fn several_canonicals_are_collapsed_after_ingest() {
        let silo = Silo::in_memory();
        let first = ingest_bytes(&silo, b"AAAA", "a").file;
        let second = ingest_bytes(&silo, b"AAAA", "b").file;
        {
            let mut tx = silo.records().begin(LockScope::HashGroup(*second.content_hash())).unwrap();
            let edge = tx.references_from(&second.id)[0].id;
            tx.delete_reference(edge).unwrap();
            tx.set_standing(second.id, Standing::Canonical).unwrap();
            tx.commit().unwrap();
        }

        let third = ingest_bytes(&silo, b"AAAA", "c");
        assert_eq!(third.canonical_id, Some(first.id));
        let canonicals: Vec<FileId> = silo
            .files()
            .unwrap()
            .iter()
            .filter(|f| f.is_canonical())
            .map(|f| f.id)
            .collect();
        assert_eq!(canonicals, vec![first.id]);
        assert_eq!(silo.file(&second.id).unwrap().role.canonical_id(), Some(first.id));
        assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_commit_releases_the_stored_blob() {
        let mut config = silo_records::RecordStoreConfig::journaled("/dev/full");
        config.sync_mode = silo_records::SyncMode::OsDefault;
        let silo = Silo::new(
            RecordStore::open(&config).unwrap(),
            silo_blob::InMemoryBlobStore::new(),
        );

        let err = silo
            .ingest(Some(&mut Cursor::new(b"doomed".to_vec())), FileMetadata::new("d", "x"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Records(silo_records::RecordError::Io(_))));
        assert!(silo.files().unwrap().is_empty());
        assert!(silo.blobs().is_empty());
    }

    #[test]
    fn concurrent_same_content_yields_one_canonical() {
        let silo = Arc::new(Silo::in_memory());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let silo = Arc::clone(&silo);
                thread::spawn(move || ingest_bytes(&*silo, b"same bytes", &format!("copy-{i}")))
            })
            .collect();
        let outcomes: Vec<IngestOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let canonicals: Vec<&IngestOutcome> = outcomes.iter().filter(|o| !o.is_duplicate).collect();
        assert_eq!(canonicals.len(), 1);
        let canonical_id = canonicals[0].file.id;
        for outcome in outcomes.iter().filter(|o| o.is_duplicate) {
            assert_eq!(outcome.canonical_id, Some(canonical_id));
        }
        assert_eq!(silo.records().references_to(&canonical_id).unwrap().len(), 15);
        assert_eq!(silo.blobs().len(), 1);
    }

    #[test]
    fn concurrent_distinct_content_are_all_canonical() {
        let silo = Arc::new(Silo::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let silo = Arc::clone(&silo);
                thread::spawn(move || {
                    ingest_bytes(&*silo, format!("content {i}").as_bytes(), "f")
                })
            })
            .collect();
        for handle in handles {
            assert!(!handle.join().unwrap().is_duplicate);
        }
        assert_eq!(silo.records().references().unwrap().len(), 0);
    }
}
