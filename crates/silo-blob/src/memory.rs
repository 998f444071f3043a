use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use silo_crypto::ContentHasher;
use silo_types::BlobLocation;

use crate::error::{BlobError, BlobResult};
use crate::traits::{content_location, BlobStore};

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. All blobs are held in memory behind a
/// `RwLock` for safe concurrent access. Blobs are cloned on read.
pub struct InMemoryBlobStore {
    hasher: ContentHasher,
    blobs: RwLock<HashMap<BlobLocation, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            hasher: ContentHasher::CONTENT,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .map(|map| map.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    /// Sorted list of every stored location.
    pub fn locations(&self) -> Vec<BlobLocation> {
        let mut locations: Vec<BlobLocation> = self
            .blobs
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        locations.sort();
        locations
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation> {
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        let location = content_location(&self.hasher.hash(&data))?;
        let mut map = self.blobs.write().map_err(|_| BlobError::Poisoned)?;
        // Same location always maps to the same content.
        map.entry(location.clone()).or_insert(data);
        Ok(location)
    }

    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>> {
        let map = self.blobs.read().map_err(|_| BlobError::Poisoned)?;
        Ok(map.get(location).cloned())
    }

    fn delete(&self, location: &BlobLocation) -> BlobResult<bool> {
        let mut map = self.blobs.write().map_err(|_| BlobError::Poisoned)?;
        Ok(map.remove(location).is_some())
    }

    fn exists(&self, location: &BlobLocation) -> BlobResult<bool> {
        let map = self.blobs.read().map_err(|_| BlobError::Poisoned)?;
        Ok(map.contains_key(location))
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
