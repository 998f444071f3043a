use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use silo_blob::BlobStore;
use silo_types::{BlobLocation, ContentHash, FileId};
use tracing::warn;

use crate::accountant::{percentage, round2, FileSavings, StorageStats};
use crate::engine::Silo;
use crate::error::EngineResult;

/// Usage for one media type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MediaTypeUsage {
    pub media_type: String,
    pub files: usize,
    pub canonical: usize,
    pub duplicates: usize,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
}

/// A canonical file ranked by how many duplicates it absorbs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicatedFile {
    pub id: FileId,
    pub display_name: String,
    pub content_hash: ContentHash,
    pub size: u64,
    pub duplicate_count: usize,
    pub saved_bytes: u64,
}

/// A record whose blob the blob store does not have.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MissingBlob {
    pub file: FileId,
    pub location: BlobLocation,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageAnalysis {
    pub stats: StorageStats,
    /// Logical over physical bytes; 0 when nothing is stored.
    pub dedup_ratio: f64,
    /// Share of files that are duplicates.
    pub duplicate_percentage: f64,
    /// Most files first, then by media type.
    pub by_media_type: Vec<MediaTypeUsage>,
    pub top_duplicated: Vec<DuplicatedFile>,
    pub missing_blobs: Vec<MissingBlob>,
}

impl<B: BlobStore> Silo<B> {
    /// Detailed storage report.
    ///
    /// `top_duplicated` lists up to `top_n` canonical files having at least
    /// `min_duplicates` duplicates (a threshold of 0 is treated as 1), most
    /// duplicated first. Every distinct blob location is probed once for
    /// `missing_blobs`.
    pub fn analyze_storage(
        &self,
        min_duplicates: usize,
        top_n: usize,
    ) -> EngineResult<StorageAnalysis> {
        let table = self.records.snapshot()?;
        let stats = StorageStats::from_table(&table);
        let files = table.files();

        let mut media: BTreeMap<&str, MediaTypeUsage> = BTreeMap::new();
        for file in &files {
            let usage = media
                .entry(file.media_type.as_str())
                .or_insert_with(|| MediaTypeUsage {
                    media_type: file.media_type.clone(),
                    ..MediaTypeUsage::default()
                });
            usage.files += 1;
            usage.logical_bytes += file.size();
            if file.is_canonical() {
                usage.canonical += 1;
                usage.physical_bytes += file.size();
            } else {
                usage.duplicates += 1;
            }
        }
        let mut by_media_type: Vec<MediaTypeUsage> = media.into_values().collect();
        // Stable sort keeps the alphabetical order among equal counts.
        by_media_type.sort_by(|a, b| b.files.cmp(&a.files));

        let threshold = min_duplicates.max(1);
        let mut top_duplicated: Vec<DuplicatedFile> = files
            .iter()
            .filter_map(|file| {
                let savings = FileSavings::of(&table, file);
                (savings.duplicate_count >= threshold).then(|| DuplicatedFile {
                    id: file.id,
                    display_name: file.display_name.clone(),
                    content_hash: *file.content_hash(),
                    size: file.size(),
                    duplicate_count: savings.duplicate_count,
                    saved_bytes: savings.storage_saved,
                })
            })
            .collect();
        // `files` is in creation order, so the stable sort settles ties.
        top_duplicated.sort_by(|a, b| b.duplicate_count.cmp(&a.duplicate_count));
        top_duplicated.truncate(top_n);

        let mut present: HashMap<&BlobLocation, bool> = HashMap::new();
        let mut missing_blobs = Vec::new();
        for file in &files {
            let exists = match present.get(&file.location) {
                Some(exists) => *exists,
                None => {
                    let exists = self.blobs.exists(&file.location)?;
                    present.insert(&file.location, exists);
                    exists
                }
            };
            if !exists {
                missing_blobs.push(MissingBlob {
                    file: file.id,
                    location: file.location.clone(),
                });
            }
        }
        if !missing_blobs.is_empty() {
            warn!(count = missing_blobs.len(), "files with missing blobs");
        }

        let dedup_ratio = if stats.physical_bytes == 0 {
            0.0
        } else {
            round2(stats.logical_bytes as f64 / stats.physical_bytes as f64)
        };
        Ok(StorageAnalysis {
            dedup_ratio,
            duplicate_percentage: percentage(stats.duplicate_count as u64, stats.total_files as u64),
            stats,
            by_media_type,
            top_duplicated,
            missing_blobs,
        })
    }
}
