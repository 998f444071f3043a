use std::sync::{Mutex, RwLock, RwLockReadGuard};

use silo_types::{BlobLocation, FileId, FileRecord, FileReference, TemporalAnchor};
use tracing::{debug, info};

use crate::config::RecordStoreConfig;
use crate::error::{RecordError, RecordResult};
use crate::journal::{Journal, JournalEntry};
use crate::lock::{LockScope, LockTable};
use crate::table::{Change, RecordTable};
use crate::tx::Transaction;

/// The durable table of file records and reference edges.
///
/// All mutation goes through [`begin`](Self::begin), which takes a lock on a
/// hash group (or the whole store) and hands out a [`Transaction`]. Reads
/// outside a transaction see the last committed state.
pub struct RecordStore {
    table: RwLock<RecordTable>,
    locks: LockTable,
    journal: Option<Journal>,
    clock: Mutex<Option<TemporalAnchor>>,
    node_id: u16,
}

impl RecordStore {
    /// Volatile store with default settings.
    pub fn in_memory() -> Self {
        Self::assemble(RecordTable::default(), None, &RecordStoreConfig::default())
    }

    /// Open a store per `config`, replaying its journal when one is set.
    pub fn open(config: &RecordStoreConfig) -> RecordResult<Self> {
        let Some(path) = &config.journal_path else {
            return Ok(Self::assemble(RecordTable::default(), None, config));
        };
        let journal = Journal::open(path, config.sync_mode)?;
        let mut table = RecordTable::default();
        let entries = journal.recover()?;
        for entry in &entries {
            table.replay(entry);
        }
        info!(
            path = %path.display(),
            entries = entries.len(),
            files = table.file_count(),
            references = table.reference_count(),
            "record store recovered"
        );
        Ok(Self::assemble(table, Some(journal), config))
    }

    fn assemble(table: RecordTable, journal: Option<Journal>, config: &RecordStoreConfig) -> Self {
        let clock = table.latest_anchor();
        Self {
            table: RwLock::new(table),
            locks: LockTable::new(config.lock_timeout()),
            journal,
            clock: Mutex::new(clock),
            node_id: config.node_id,
        }
    }

    /// Lock `scope` and start a transaction over it.
    pub fn begin(&self, scope: LockScope) -> RecordResult<Transaction<'_>> {
        let guard = self.locks.acquire(scope)?;
        let working = {
            let table = self.read()?;
            match scope {
                LockScope::HashGroup(hash) => table.group(&hash),
                LockScope::Exclusive => table.clone(),
            }
        };
        Ok(Transaction::new(self, guard, working))
    }

    pub fn file(&self, id: &FileId) -> RecordResult<Option<FileRecord>> {
        Ok(self.read()?.file(id).cloned())
    }

    /// Every file, ordered by creation anchor then id.
    pub fn files(&self) -> RecordResult<Vec<FileRecord>> {
        Ok(self.read()?.files().into_iter().cloned().collect())
    }

    pub fn references(&self) -> RecordResult<Vec<FileReference>> {
        Ok(self.read()?.references().into_iter().cloned().collect())
    }

    pub fn references_to(&self, file: &FileId) -> RecordResult<Vec<FileReference>> {
        Ok(self.read()?.references_to(file).into_iter().cloned().collect())
    }

    pub fn references_from(&self, file: &FileId) -> RecordResult<Vec<FileReference>> {
        Ok(self.read()?.references_from(file).into_iter().cloned().collect())
    }

    pub fn location_in_use(&self, location: &BlobLocation) -> RecordResult<bool> {
        Ok(self.read()?.location_in_use(location))
    }

    /// Point-in-time copy of the committed tables.
    pub fn snapshot(&self) -> RecordResult<RecordTable> {
        Ok(self.read()?.clone())
    }

    /// Rewrite the journal as one snapshot entry. Returns `false` for a
    /// volatile store, which has nothing to compact.
    pub fn compact(&self) -> RecordResult<bool> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(LockScope::Exclusive)?;
        let before = journal.offset()?;
        let snapshot = self.read()?.snapshot();
        journal.rewrite(&JournalEntry::Snapshot(snapshot))?;
        info!(before, after = journal.offset()?, "journal compacted");
        Ok(true)
    }

    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub(crate) fn next_anchor(&self) -> RecordResult<TemporalAnchor> {
        let mut last = self.clock.lock().map_err(|_| RecordError::Poisoned)?;
        let next = TemporalAnchor::next_after(last.as_ref(), self.node_id);
        *last = Some(next);
        Ok(next)
    }

    /// Journal first, then apply. A failed append leaves memory untouched.
    pub(crate) fn apply_commit(&self, changes: &[Change]) -> RecordResult<()> {
        let mut table = self.table.write().map_err(|_| RecordError::Poisoned)?;
        let entry = JournalEntry::Commit(changes.to_vec());
        if let Some(journal) = &self.journal {
            journal.append(&entry)?;
        }
        table.replay(&entry);
        debug!(files = table.file_count(), references = table.reference_count(), "commit applied");
        Ok(())
    }

    fn read(&self) -> RecordResult<RwLockReadGuard<'_, RecordTable>> {
        self.table.read().map_err(|_| RecordError::Poisoned)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("journal", &self.journal)
            .field("node_id", &self.node_id)
            .finish()
    }
}
