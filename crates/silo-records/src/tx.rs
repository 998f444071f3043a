use silo_types::{
    BlobLocation, ContentHash, FileId, FileRecord, FileReference, ReferenceId, Standing,
    TemporalAnchor, TypeError,
};
use tracing::debug;

use crate::error::{RecordError, RecordResult};
use crate::lock::{LockGuard, LockScope};
use crate::store::RecordStore;
use crate::table::{Change, RecordTable};

/// A read-modify-write unit of work over one lock scope.
///
/// Reads see the committed rows of the scope plus this transaction's own
/// writes. Writes are validated immediately and buffered; nothing reaches
/// the store until [`commit`](Self::commit). Dropping a transaction
/// discards every write made since the last commit and releases the lock.
pub struct Transaction<'a> {
    store: &'a RecordStore,
    guard: LockGuard<'a>,
    working: RecordTable,
    changes: Vec<Change>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a RecordStore, guard: LockGuard<'a>, working: RecordTable) -> Self {
        Self {
            store,
            guard,
            working,
            changes: Vec::new(),
        }
    }

    pub fn scope(&self) -> &LockScope {
        self.guard.scope()
    }

    /// Number of buffered writes.
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    // Reads

    pub fn file(&self, id: &FileId) -> Option<&FileRecord> {
        self.working.file(id)
    }

    pub fn files(&self) -> Vec<&FileRecord> {
        self.working.files()
    }

    pub fn files_with_hash(&self, hash: &ContentHash) -> Vec<&FileRecord> {
        self.working.files_with_hash(hash)
    }

    /// Canonical files for `hash`, earliest first. More than one means the
    /// group is inconsistent.
    pub fn canonicals(&self, hash: &ContentHash) -> Vec<&FileRecord> {
        self.working
            .files_with_hash(hash)
            .into_iter()
            .filter(|f| f.is_canonical())
            .collect()
    }

    pub fn hashes(&self) -> Vec<ContentHash> {
        self.working.hashes()
    }

    pub fn reference(&self, id: &ReferenceId) -> Option<&FileReference> {
        self.working.reference(id)
    }

    pub fn references(&self) -> Vec<&FileReference> {
        self.working.references()
    }

    pub fn references_from(&self, file: &FileId) -> Vec<&FileReference> {
        self.working.references_from(file)
    }

    pub fn references_to(&self, file: &FileId) -> Vec<&FileReference> {
        self.working.references_to(file)
    }

    /// Whether a row visible to this transaction names `location`.
    pub fn location_in_use(&self, location: &BlobLocation) -> bool {
        self.working.location_in_use(location)
    }

    /// Whether any committed row in the whole store names `location`.
    pub fn location_committed(&self, location: &BlobLocation) -> RecordResult<bool> {
        self.store.location_in_use(location)
    }

    /// Next creation anchor from the store clock.
    pub fn next_anchor(&self) -> RecordResult<TemporalAnchor> {
        self.store.next_anchor()
    }

    // Writes

    pub fn insert_file(&mut self, file: FileRecord) -> RecordResult<()> {
        self.check_scope(file.content_hash())?;
        if self.working.file(&file.id).is_some() {
            return Err(RecordError::DuplicateRow(format!("file {}", file.id)));
        }
        self.record(Change::InsertFile(file));
        Ok(())
    }

    pub fn set_standing(&mut self, id: FileId, standing: Standing) -> RecordResult<()> {
        let current = self.file_in_scope(&id)?.standing;
        if current != standing {
            self.record(Change::SetStanding { file: id, standing });
        }
        Ok(())
    }

    /// Delete a file and cascade to every reference naming it.
    pub fn delete_file(&mut self, id: FileId) -> RecordResult<FileRecord> {
        let file = self.file_in_scope(&id)?.clone();
        self.record(Change::DeleteFile(id));
        Ok(file)
    }

    pub fn insert_reference(&mut self, reference: FileReference) -> RecordResult<()> {
        if reference.canonical == reference.duplicate {
            return Err(TypeError::SelfReference(reference.canonical.to_string()).into());
        }
        if self.working.reference(&reference.id).is_some() {
            return Err(RecordError::DuplicateRow(format!("reference {}", reference.id)));
        }
        self.file_in_scope(&reference.canonical)?;
        self.file_in_scope(&reference.duplicate)?;
        self.record(Change::InsertReference(reference));
        Ok(())
    }

    /// Point an existing reference at a different canonical file.
    pub fn repoint_reference(&mut self, id: ReferenceId, canonical: FileId) -> RecordResult<()> {
        let reference = self
            .working
            .reference(&id)
            .ok_or(RecordError::ReferenceNotFound(id))?;
        let duplicate = reference.duplicate;
        if reference.canonical == canonical {
            return Ok(());
        }
        if duplicate == canonical {
            return Err(TypeError::SelfReference(canonical.to_string()).into());
        }
        self.check_reference_scope(&id)?;
        self.file_in_scope(&canonical)?;
        self.record(Change::RepointReference {
            reference: id,
            canonical,
        });
        Ok(())
    }

    pub fn delete_reference(&mut self, id: ReferenceId) -> RecordResult<FileReference> {
        let reference = self
            .working
            .reference(&id)
            .cloned()
            .ok_or(RecordError::ReferenceNotFound(id))?;
        self.check_reference_scope(&id)?;
        self.record(Change::DeleteReference(id));
        Ok(reference)
    }

    /// Apply all buffered writes atomically. Returns the number applied.
    ///
    /// The scope stays locked until the transaction is dropped, so follow-up
    /// work on the committed state (releasing blobs) cannot race a new
    /// writer. Writes made after a commit need another commit.
    pub fn commit(&mut self) -> RecordResult<usize> {
        let count = self.changes.len();
        if count > 0 {
            self.store.apply_commit(&self.changes)?;
            self.changes.clear();
        }
        debug!(scope = %self.guard.scope(), changes = count, "transaction committed");
        Ok(count)
    }

    /// Discard buffered writes and release the lock.
    pub fn rollback(self) {
        debug!(
            scope = %self.guard.scope(),
            discarded = self.changes.len(),
            "transaction rolled back"
        );
    }

    fn record(&mut self, change: Change) {
        self.working.apply(&change);
        self.changes.push(change);
    }

    fn check_scope(&self, hash: &ContentHash) -> RecordResult<()> {
        match self.guard.scope() {
            LockScope::Exclusive => Ok(()),
            LockScope::HashGroup(held) if held == hash => Ok(()),
            scope => Err(RecordError::OutOfScope {
                scope: scope.to_string(),
                hash: *hash,
            }),
        }
    }

    fn file_in_scope(&self, id: &FileId) -> RecordResult<&FileRecord> {
        let file = self
            .working
            .file(id)
            .ok_or(RecordError::FileNotFound(*id))?;
        self.check_scope(file.content_hash())?;
        Ok(file)
    }

    /// A reference belongs to the hash group of its duplicate end.
    fn check_reference_scope(&self, id: &ReferenceId) -> RecordResult<()> {
        let Some(reference) = self.working.reference(id) else {
            return Err(RecordError::ReferenceNotFound(*id));
        };
        let owner = self
            .working
            .file(&reference.duplicate)
            .or_else(|| self.working.file(&reference.canonical));
        match owner {
            Some(file) => self.check_scope(file.content_hash()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("scope", self.guard.scope())
            .field("pending", &self.changes.len())
            .finish()
    }
}
