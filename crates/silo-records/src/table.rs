use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use silo_types::{
    BlobLocation, ContentHash, FileId, FileRecord, FileReference, ReferenceId, Standing,
    TemporalAnchor,
};

use crate::journal::JournalEntry;

/// A single row-level mutation.
///
/// Transactions accumulate changes and the store applies them in order at
/// commit. The same sequence is written to the journal, so replaying it
/// reproduces the committed state exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    InsertFile(FileRecord),
    SetStanding { file: FileId, standing: Standing },
    /// Removes the file and every reference naming it at either end.
    DeleteFile(FileId),
    InsertReference(FileReference),
    RepointReference { reference: ReferenceId, canonical: FileId },
    DeleteReference(ReferenceId),
}

/// Plain row dump of a table, used for journal compaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub files: Vec<FileRecord>,
    pub references: Vec<FileReference>,
}

/// The file and reference tables with their secondary indexes.
#[derive(Clone, Debug, Default)]
pub struct RecordTable {
    files: BTreeMap<FileId, FileRecord>,
    references: BTreeMap<ReferenceId, FileReference>,
    by_hash: HashMap<ContentHash, BTreeSet<FileId>>,
    by_location: HashMap<BlobLocation, BTreeSet<FileId>>,
    by_duplicate: HashMap<FileId, BTreeSet<ReferenceId>>,
    by_canonical: HashMap<FileId, BTreeSet<ReferenceId>>,
}

impl RecordTable {
    pub fn from_snapshot(snapshot: TableSnapshot) -> Self {
        let mut table = Self::default();
        for file in snapshot.files {
            table.insert_file_row(file);
        }
        for reference in snapshot.references {
            table.insert_reference_row(reference);
        }
        table
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            files: self.files.values().cloned().collect(),
            references: self.references.values().cloned().collect(),
        }
    }

    pub fn file(&self, id: &FileId) -> Option<&FileRecord> {
        self.files.get(id)
    }

    pub fn reference(&self, id: &ReferenceId) -> Option<&FileReference> {
        self.references.get(id)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Every file, ordered by creation anchor then id.
    pub fn files(&self) -> Vec<&FileRecord> {
        let mut files: Vec<&FileRecord> = self.files.values().collect();
        files.sort_by_key(|f| f.creation_key());
        files
    }

    /// Every reference, ordered by creation anchor then id.
    pub fn references(&self) -> Vec<&FileReference> {
        let mut refs: Vec<&FileReference> = self.references.values().collect();
        refs.sort_by_key(|r| r.creation_key());
        refs
    }

    /// Files sharing `hash`, ordered by creation anchor then id.
    pub fn files_with_hash(&self, hash: &ContentHash) -> Vec<&FileRecord> {
        let mut files: Vec<&FileRecord> = self
            .by_hash
            .get(hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.files.get(id))
            .collect();
        files.sort_by_key(|f| f.creation_key());
        files
    }

    /// Distinct content hashes currently present.
    pub fn hashes(&self) -> Vec<ContentHash> {
        let mut hashes: Vec<ContentHash> = self.by_hash.keys().copied().collect();
        hashes.sort();
        hashes
    }

    /// References whose duplicate end is `file`, in creation order.
    pub fn references_from(&self, file: &FileId) -> Vec<&FileReference> {
        self.collect_refs(self.by_duplicate.get(file))
    }

    /// References whose canonical end is `file`, in creation order.
    pub fn references_to(&self, file: &FileId) -> Vec<&FileReference> {
        self.collect_refs(self.by_canonical.get(file))
    }

    /// Whether any file row names `location`.
    pub fn location_in_use(&self, location: &BlobLocation) -> bool {
        self.by_location.contains_key(location)
    }

    /// Latest creation anchor among all rows.
    pub fn latest_anchor(&self) -> Option<TemporalAnchor> {
        let files = self.files.values().map(|f| f.created_at);
        let refs = self.references.values().map(|r| r.created_at);
        files.chain(refs).max()
    }

    /// Copy of the rows a hash-group transaction may see: every file with
    /// `hash`, every reference touching one of them, and the far endpoint of
    /// each such reference.
    pub fn group(&self, hash: &ContentHash) -> Self {
        let mut part = Self::default();
        let members: Vec<FileId> = self
            .by_hash
            .get(hash)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in &members {
            if let Some(file) = self.files.get(id) {
                part.insert_file_row(file.clone());
            }
        }
        for id in &members {
            let touching = self
                .by_duplicate
                .get(id)
                .into_iter()
                .chain(self.by_canonical.get(id))
                .flatten();
            for ref_id in touching {
                let Some(reference) = self.references.get(ref_id) else {
                    continue;
                };
                for end in [reference.canonical, reference.duplicate] {
                    if !part.files.contains_key(&end) {
                        if let Some(file) = self.files.get(&end) {
                            part.insert_file_row(file.clone());
                        }
                    }
                }
                part.insert_reference_row(reference.clone());
            }
        }
        part
    }

    /// Apply one change. Changes naming missing rows are ignored and report
    /// `false`, which keeps journal replay tolerant of skipped entries.
    pub fn apply(&mut self, change: &Change) -> bool {
        match change {
            Change::InsertFile(file) => {
                if self.files.contains_key(&file.id) {
                    return false;
                }
                self.insert_file_row(file.clone());
                true
            }
            Change::SetStanding { file, standing } => match self.files.get_mut(file) {
                Some(row) => {
                    row.standing = *standing;
                    true
                }
                None => false,
            },
            Change::DeleteFile(id) => {
                let Some(file) = self.files.remove(id) else {
                    return false;
                };
                unindex(&mut self.by_hash, file.content_hash(), id);
                unindex(&mut self.by_location, &file.location, id);
                let cascade: Vec<ReferenceId> = self
                    .by_duplicate
                    .get(id)
                    .into_iter()
                    .chain(self.by_canonical.get(id))
                    .flatten()
                    .copied()
                    .collect();
                for ref_id in cascade {
                    self.remove_reference_row(&ref_id);
                }
                true
            }
            Change::InsertReference(reference) => {
                if self.references.contains_key(&reference.id) {
                    return false;
                }
                self.insert_reference_row(reference.clone());
                true
            }
            Change::RepointReference {
                reference,
                canonical,
            } => {
                let Some(row) = self.references.get_mut(reference) else {
                    return false;
                };
                let previous = std::mem::replace(&mut row.canonical, *canonical);
                unindex(&mut self.by_canonical, &previous, reference);
                self.by_canonical
                    .entry(*canonical)
                    .or_default()
                    .insert(*reference);
                true
            }
            Change::DeleteReference(id) => self.remove_reference_row(id).is_some(),
        }
    }

    /// Apply a whole journal entry.
    pub fn replay(&mut self, entry: &JournalEntry) {
        match entry {
            JournalEntry::Commit(changes) => {
                for change in changes {
                    self.apply(change);
                }
            }
            JournalEntry::Snapshot(snapshot) => {
                *self = Self::from_snapshot(snapshot.clone());
            }
        }
    }

    fn collect_refs(&self, ids: Option<&BTreeSet<ReferenceId>>) -> Vec<&FileReference> {
        let mut refs: Vec<&FileReference> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.references.get(id))
            .collect();
        refs.sort_by_key(|r| r.creation_key());
        refs
    }

    fn insert_file_row(&mut self, file: FileRecord) {
        self.by_hash
            .entry(*file.content_hash())
            .or_default()
            .insert(file.id);
        self.by_location
            .entry(file.location.clone())
            .or_default()
            .insert(file.id);
        self.files.insert(file.id, file);
    }

    fn insert_reference_row(&mut self, reference: FileReference) {
        self.by_duplicate
            .entry(reference.duplicate)
            .or_default()
            .insert(reference.id);
        self.by_canonical
            .entry(reference.canonical)
            .or_default()
            .insert(reference.id);
        self.references.insert(reference.id, reference);
    }

    fn remove_reference_row(&mut self, id: &ReferenceId) -> Option<FileReference> {
        let reference = self.references.remove(id)?;
        unindex(&mut self.by_duplicate, &reference.duplicate, id);
        unindex(&mut self.by_canonical, &reference.canonical, id);
        Some(reference)
    }
}

fn unindex<K: Hash + Eq, V: Ord>(map: &mut HashMap<K, BTreeSet<V>>, key: &K, value: &V) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}
