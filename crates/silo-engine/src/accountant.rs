use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::RecordTable;
use silo_types::{FileId, FileRecord};

use crate::engine::Silo;
use crate::error::{EngineError, EngineResult};

/// Whole-store storage figures.
///
/// Physical bytes count canonical files only, since duplicates share their
/// canonical's blob. Logical bytes count every file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub canonical_count: usize,
    pub duplicate_count: usize,
    pub physical_bytes: u64,
    pub logical_bytes: u64,
    pub saved_bytes: u64,
    /// `saved / logical * 100`, two decimals; 0 for an empty store.
    pub saved_percentage: f64,
}

impl StorageStats {
    pub(crate) fn from_table(table: &RecordTable) -> Self {
        let mut stats = Self::default();
        for file in table.files() {
            stats.total_files += 1;
            stats.logical_bytes = stats.logical_bytes.saturating_add(file.size());
            if file.is_canonical() {
                stats.canonical_count += 1;
                stats.physical_bytes = stats.physical_bytes.saturating_add(file.size());
            } else {
                stats.duplicate_count += 1;
            }
        }
        stats.saved_bytes = stats.logical_bytes.saturating_sub(stats.physical_bytes);
        stats.saved_percentage = percentage(stats.saved_bytes, stats.logical_bytes);
        stats
    }
}

/// What one canonical file saves through its duplicates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileSavings {
    pub duplicate_count: usize,
    pub storage_saved: u64,
}

impl FileSavings {
    pub(crate) fn of(table: &RecordTable, file: &FileRecord) -> Self {
        if !file.is_canonical() {
            return Self::default();
        }
        let duplicate_count = table.references_to(&file.id).len();
        Self {
            duplicate_count,
            storage_saved: file.size().saturating_mul(duplicate_count as u64),
        }
    }
}

/// Percentage rounded to two decimals; 0 when the whole is 0.
pub(crate) fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl<B: BlobStore> Silo<B> {
    /// Read-only storage accounting over a consistent snapshot.
    pub fn storage_stats(&self) -> EngineResult<StorageStats> {
        Ok(StorageStats::from_table(&self.records.snapshot()?))
    }

    /// Duplicate count and bytes saved for one file. Duplicates save
    /// nothing themselves.
    pub fn file_savings(&self, id: &FileId) -> EngineResult<FileSavings> {
        let table = self.records.snapshot()?;
        let file = table.file(id).ok_or(EngineError::NotFound(*id))?;
        Ok(FileSavings::of(&table, file))
    }
}
