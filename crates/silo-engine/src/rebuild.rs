use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::{LockScope, RecordResult, Transaction};
use silo_types::{FileId, FileReference, ReferenceId, Standing};
use tracing::info;

use crate::engine::Silo;
use crate::error::EngineResult;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub total_files: usize,
    pub canonical_count: usize,
    pub duplicate_count: usize,
    pub references_removed: usize,
    pub references_created: usize,
}

impl<B: BlobStore> Silo<B> {
    /// Recompute every canonical/duplicate assignment from content hashes
    /// alone, discarding all existing references.
    ///
    /// In each hash group the earliest file (creation anchor, then id)
    /// becomes canonical and every other member gets one reference to it.
    /// Runs as one exclusive transaction: either everything is reassigned
    /// or nothing is.
    pub fn rebuild_all(&self) -> EngineResult<RebuildReport> {
        let mut tx = self.records.begin(LockScope::Exclusive)?;
        let report = reassign(&mut tx)?;
        tx.commit()?;
        info!(
            files = report.total_files,
            canonical = report.canonical_count,
            duplicates = report.duplicate_count,
            removed = report.references_removed,
            created = report.references_created,
            "rebuilt file references"
        );
        Ok(report)
    }
}

fn reassign(tx: &mut Transaction<'_>) -> RecordResult<RebuildReport> {
    let mut report = RebuildReport::default();

    let existing: Vec<ReferenceId> = tx.references().iter().map(|r| r.id).collect();
    for id in existing {
        tx.delete_reference(id)?;
        report.references_removed += 1;
    }

    for hash in tx.hashes() {
        let members: Vec<FileId> = tx.files_with_hash(&hash).iter().map(|f| f.id).collect();
        let Some((keeper, rest)) = members.split_first() else {
            continue;
        };
        tx.set_standing(*keeper, Standing::Canonical)?;
        report.canonical_count += 1;
        for duplicate in rest {
            tx.set_standing(*duplicate, Standing::Duplicate)?;
            tx.insert_reference(FileReference::new(*keeper, *duplicate, tx.next_anchor()?)?)?;
            report.duplicate_count += 1;
            report.references_created += 1;
        }
        report.total_files += members.len();
    }
    Ok(report)
}
