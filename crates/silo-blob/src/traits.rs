use std::io::Read;

use silo_types::{BlobLocation, ContentHash};

use crate::error::BlobResult;

/// Byte storage addressed by opaque locations.
///
/// All implementations must satisfy these invariants:
/// - A location returned by `put` stays readable until `delete` is called
///   for it.
/// - Concurrent reads are always safe (blobs are immutable).
/// - The store never interprets blob contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Persist everything `content` yields and return its location.
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation>;

    /// Read a blob back.
    ///
    /// Returns `Ok(None)` if nothing is stored at `location`.
    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>>;

    /// Delete a blob. Returns `true` if it existed.
    ///
    /// Deleting a location that a record still names loses data; callers
    /// must check first.
    fn delete(&self, location: &BlobLocation) -> BlobResult<bool>;

    /// Check whether a blob exists at `location`.
    fn exists(&self, location: &BlobLocation) -> BlobResult<bool>;

    /// Persist an in-memory buffer.
    fn put_bytes(&self, data: &[u8]) -> BlobResult<BlobLocation> {
        let mut reader = data;
        self.put(&mut reader)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation> {
        (**self).put(content)
    }

    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>> {
        (**self).get(location)
    }

    fn delete(&self, location: &BlobLocation) -> BlobResult<bool> {
        (**self).delete(location)
    }

    fn exists(&self, location: &BlobLocation) -> BlobResult<bool> {
        (**self).exists(location)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation> {
        (**self).put(content)
    }

    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>> {
        (**self).get(location)
    }

    fn delete(&self, location: &BlobLocation) -> BlobResult<bool> {
        (**self).delete(location)
    }

    fn exists(&self, location: &BlobLocation) -> BlobResult<bool> {
        (**self).exists(location)
    }
}

/// Location the bundled content-addressed backends issue for a digest:
/// the first two hex characters as a shard directory, the rest as the name.
pub fn content_location(hash: &ContentHash) -> BlobResult<BlobLocation> {
    let hex = hash.to_hex();
    Ok(BlobLocation::new(format!("{}/{}", &hex[..2], &hex[2..]))?)
}

/// Inverse check of [`content_location`]: two hex characters, a slash, and
/// sixty-two hex characters. Guards the filesystem backend against paths
/// that would escape its root.
pub fn is_content_location(location: &BlobLocation) -> bool {
    let raw = location.as_str();
    raw.len() == 65
        && raw.as_bytes()[2] == b'/'
        && raw
            .char_indices()
            .all(|(i, c)| i == 2 || c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_location_shape() {
        let location = content_location(&ContentHash::of(b"abc")).unwrap();
        assert_eq!(location.as_str().len(), 65);
        assert!(is_content_location(&location));
    }

    #[test]
    fn boxed_store_delegates() {
        let store: Box<dyn BlobStore> = Box::new(crate::InMemoryBlobStore::new());
        let location = store.put_bytes(b"boxed").unwrap();
        assert!(store.exists(&location).unwrap());
    }

    #[test]
    fn traversal_is_not_a_content_location() {
        let bad = BlobLocation::new("../../etc/passwd").unwrap();
        assert!(!is_content_location(&bad));
        let upper = BlobLocation::new(format!("AB/{}", "c".repeat(62))).unwrap();
        assert!(!is_content_location(&upper));
    }
}
