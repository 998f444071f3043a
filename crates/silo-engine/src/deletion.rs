use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::{LockScope, Transaction};
use silo_types::{FileId, FileRecord, FileReference, Standing};
use tracing::{debug, info, warn};

use crate::engine::Silo;
use crate::error::{EngineError, EngineResult};

/// What a successful deletion did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeletionOutcome {
    /// A duplicate and its reference were removed.
    DuplicateRemoved {
        /// Canonical the duplicate pointed at, if it had a reference.
        canonical: Option<FileId>,
        blob_released: bool,
    },
    /// A canonical without duplicates was removed.
    CanonicalRemoved { blob_released: bool },
    /// A canonical was removed and one of its duplicates took over.
    Promoted {
        new_canonical: FileId,
        /// References moved from the old canonical to the new one.
        repointed: usize,
        blob_released: bool,
    },
}

impl DeletionOutcome {
    pub fn blob_released(&self) -> bool {
        match self {
            Self::DuplicateRemoved { blob_released, .. }
            | Self::CanonicalRemoved { blob_released }
            | Self::Promoted { blob_released, .. } => *blob_released,
        }
    }
}

impl<B: BlobStore> Silo<B> {
    /// Delete one file.
    ///
    /// Deleting a canonical file that still has duplicates is refused with
    /// [`EngineError::ConflictRequiresConfirmation`] unless
    /// `confirm_promotion` is set, in which case the duplicate behind the
    /// earliest reference becomes canonical and inherits the others.
    ///
    /// The whole deletion is one transaction under the file's hash-group
    /// lock. The blob goes only when no remaining record names it.
    pub fn delete(&self, id: &FileId, confirm_promotion: bool) -> EngineResult<DeletionOutcome> {
        let hash = *self
            .records
            .file(id)?
            .ok_or(EngineError::NotFound(*id))?
            .content_hash();
        let tx = self.records.begin(LockScope::HashGroup(hash))?;
        // Re-check under the lock; a concurrent delete may have won.
        let file = tx.file(id).cloned().ok_or(EngineError::NotFound(*id))?;

        match file.standing {
            Standing::Duplicate => self.remove_duplicate(tx, file),
            Standing::Canonical => self.remove_canonical(tx, file, confirm_promotion),
        }
    }

    fn remove_duplicate(
        &self,
        mut tx: Transaction<'_>,
        file: FileRecord,
    ) -> EngineResult<DeletionOutcome> {
        let references: Vec<FileReference> =
            tx.references_from(&file.id).into_iter().cloned().collect();
        if references.is_empty() {
            warn!(file = %file.id, "duplicate has no reference; deleting anyway");
        } else if references.len() > 1 {
            warn!(file = %file.id, count = references.len(), "duplicate has several references");
        }
        let canonical = references.first().map(|r| r.canonical);
        for reference in &references {
            tx.delete_reference(reference.id)?;
        }
        tx.delete_file(file.id)?;
        tx.commit()?;

        let blob_released = self.release_blob(&tx, &file.location);
        debug!(file = %file.id, ?canonical, blob_released, "duplicate deleted");
        Ok(DeletionOutcome::DuplicateRemoved {
            canonical,
            blob_released,
        })
    }

    fn remove_canonical(
        &self,
        mut tx: Transaction<'_>,
        file: FileRecord,
        confirm_promotion: bool,
    ) -> EngineResult<DeletionOutcome> {
        // Edges from files of other content are dangling; the cascade on
        // delete drops them and the auditor owns any follow-up.
        let (references, duplicates): (Vec<FileReference>, Vec<FileRecord>) = tx
            .references_to(&file.id)
            .into_iter()
            .filter_map(|r| {
                tx.file(&r.duplicate)
                    .filter(|d| d.content_hash() == file.content_hash())
                    .map(|d| (r.clone(), d.clone()))
            })
            .unzip();

        let Some(first) = references.first() else {
            tx.delete_file(file.id)?;
            tx.commit()?;
            let blob_released = self.release_blob(&tx, &file.location);
            debug!(file = %file.id, blob_released, "canonical deleted");
            return Ok(DeletionOutcome::CanonicalRemoved { blob_released });
        };

        if !confirm_promotion {
            return Err(EngineError::ConflictRequiresConfirmation {
                file: file.id,
                duplicate_ids: duplicates.iter().map(|d| d.id).collect(),
                duplicate_names: duplicates.into_iter().map(|d| d.display_name).collect(),
            });
        }

        let promoted = first.duplicate;
        tx.set_standing(promoted, Standing::Canonical)?;
        tx.delete_reference(first.id)?;
        let mut repointed = 0;
        for reference in &references[1..] {
            tx.repoint_reference(reference.id, promoted)?;
            repointed += 1;
        }
        tx.delete_file(file.id)?;
        tx.commit()?;

        let blob_released = self.release_blob(&tx, &file.location);
        info!(
            deleted = %file.id,
            promoted = %promoted,
            repointed,
            blob_released,
            "canonical deleted; duplicate promoted"
        );
        Ok(DeletionOutcome::Promoted {
            new_canonical: promoted,
            repointed,
            blob_released,
        })
    }
}
