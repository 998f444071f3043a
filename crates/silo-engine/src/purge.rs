use std::collections::BTreeSet;

use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::{LockScope, RecordResult, Transaction};
use silo_types::{BlobLocation, FileId, FileRecord};
use tracing::info;

use crate::engine::Silo;
use crate::error::EngineResult;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Duplicates found (and deleted, unless this was a dry run).
    pub duplicate_count: usize,
    /// Logical bytes those duplicates accounted for.
    pub bytes: u64,
    pub deleted: Vec<FileId>,
    /// Blobs physically removed; always 0 for a dry run.
    pub released_blobs: usize,
    pub dry_run: bool,
}

impl<B: BlobStore> Silo<B> {
    /// Delete every duplicate file and its references in one exclusive
    /// transaction. Canonical files are untouched, so shared blobs stay;
    /// only blobs no remaining record names are released.
    ///
    /// With `dry_run` the transaction is rolled back and the report lists
    /// what would have been removed.
    pub fn purge_duplicates(&self, dry_run: bool) -> EngineResult<PurgeReport> {
        let mut tx = self.records.begin(LockScope::Exclusive)?;
        let (mut report, locations) = remove_duplicates(&mut tx)?;
        report.dry_run = dry_run;

        if dry_run {
            tx.rollback();
            info!(
                duplicates = report.duplicate_count,
                bytes = report.bytes,
                "duplicate purge dry run"
            );
            return Ok(report);
        }

        tx.commit()?;
        report.released_blobs = locations
            .iter()
            .filter(|location| self.release_blob(&tx, location))
            .count();
        info!(
            duplicates = report.duplicate_count,
            bytes = report.bytes,
            released = report.released_blobs,
            "duplicates purged"
        );
        Ok(report)
    }
}

fn remove_duplicates(
    tx: &mut Transaction<'_>,
) -> RecordResult<(PurgeReport, BTreeSet<BlobLocation>)> {
    let duplicates: Vec<FileRecord> = tx
        .files()
        .into_iter()
        .filter(|f| !f.is_canonical())
        .cloned()
        .collect();

    let mut report = PurgeReport::default();
    let mut locations = BTreeSet::new();
    for file in duplicates {
        // Deleting the file cascades to its references.
        tx.delete_file(file.id)?;
        report.duplicate_count += 1;
        report.bytes += file.size();
        report.deleted.push(file.id);
        locations.insert(file.location);
    }
    Ok((report, locations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ingest_bytes;

    #[test]
    fn purge_removes_duplicates_and_keeps_shared_blobs() {
        let silo = Silo::in_memory();
        let a = ingest_bytes(&silo, b"AAAA", "a").file;
        let a2 = ingest_bytes(&silo, b"AAAA", "a2").file;
        let a3 = ingest_bytes(&silo, b"AAAA", "a3").file;
        let b = ingest_bytes(&silo, b"BB", "b").file;

        let report = silo.purge_duplicates(false).unwrap();
        assert_eq!(report.duplicate_count, 2);
        assert_eq!(report.bytes, 8);
        assert_eq!(report.deleted, vec![a2.id, a3.id]);
        assert_eq!(report.released_blobs, 0);
        assert!(!report.dry_run);

        let remaining: Vec<FileId> = silo.files().unwrap().iter().map(|f| f.id).collect();
        assert_eq!(remaining, vec![a.id, b.id]);
        assert!(silo.records().references().unwrap().is_empty());
        assert_eq!(silo.blobs().len(), 2);
        assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let silo = Silo::in_memory();
        ingest_bytes(&silo, b"x", "x1");
        ingest_bytes(&silo, b"x", "x2");
        let before = silo.storage_stats().unwrap();

        let report = silo.purge_duplicates(true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(silo.storage_stats().unwrap(), before);
        assert_eq!(silo.records().references().unwrap().len(), 1);
    }

    #[test]
    fn orphan_duplicate_blob_is_released() {
        let silo = Silo::in_memory();
        let canonical = ingest_bytes(&silo, b"gone", "c").file;
        ingest_bytes(&silo, b"gone", "d");
        // Remove the canonical row only, leaving the duplicate as the last
        // holder of the blob.
        {
            let mut tx = silo.records().begin(LockScope::Exclusive).unwrap();
            tx.delete_file(canonical.id).unwrap();
            tx.commit().unwrap();
        }
        let report = silo.purge_duplicates(false).unwrap();
        assert_eq!(report.released_blobs, 1);
        assert!(silo.blobs().is_empty());
    }

    #[test]
    fn purge_of_store_without_duplicates() {
        let silo = Silo::in_memory();
        ingest_bytes(&silo, b"one", "1");
        let report = silo.purge_duplicates(false).unwrap();
        assert_eq!(report.duplicate_count, 0);
        assert_eq!(silo.files().unwrap().len(), 1);
    }
}
