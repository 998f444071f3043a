use std::io::{self, Read, Seek, SeekFrom};

use silo_types::ContentHash;

/// Default chunk size for streaming reads (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Result of hashing a stream: the digest and the number of bytes consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Digest {
    pub hash: ContentHash,
    pub size: u64,
}

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so digests from different schemes never collide. A hasher is
/// a pure value: hashing has no side effects besides consuming the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHasher {
    domain: &'static str,
    buffer_size: usize,
}

impl ContentHasher {
    /// Hasher for file content, the deduplication key.
    pub const CONTENT: Self = Self {
        domain: "silo-content-v1",
        buffer_size: DEFAULT_BUFFER_SIZE,
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self {
            domain,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Same domain, different read chunk size. Zero is bumped to one byte.
    pub const fn with_buffer_size(self, buffer_size: usize) -> Self {
        Self {
            domain: self.domain,
            buffer_size: if buffer_size == 0 { 1 } else { buffer_size },
        }
    }

    /// Hash an in-memory byte slice.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = self.streaming();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash everything `reader` yields until EOF.
    pub fn hash_reader<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Digest, HasherError> {
        let mut hasher = self.streaming();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HasherError::Read(e)),
            };
            hasher.update(&buf[..n]);
        }
        Ok(Digest {
            hash: hasher.finalize(),
            size: hasher.bytes_hashed(),
        })
    }

    /// Hash a seekable stream from its start and rewind it to the start.
    ///
    /// The digest always covers the full content regardless of where the
    /// read position was on entry.
    pub fn hash_seekable<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Result<Digest, HasherError> {
        reader.seek(SeekFrom::Start(0)).map_err(HasherError::Seek)?;
        let digest = self.hash_reader(reader)?;
        reader.seek(SeekFrom::Start(0)).map_err(HasherError::Seek)?;
        Ok(digest)
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }

    /// Start an incremental hash in this domain.
    pub fn streaming(&self) -> StreamingHasher {
        StreamingHasher::new(self.domain)
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::CONTENT
    }
}

/// Incremental, resettable hash state for one domain.
#[derive(Clone)]
pub struct StreamingHasher {
    domain: &'static str,
    inner: blake3::Hasher,
    bytes: u64,
}

impl StreamingHasher {
    fn new(domain: &'static str) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(domain.as_bytes());
        inner.update(b":");
        Self {
            domain,
            inner,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self.bytes += data.len() as u64;
        self
    }

    /// Digest of everything fed so far. Does not consume the state.
    pub fn finalize(&self) -> ContentHash {
        ContentHash::from_digest(*self.inner.finalize().as_bytes())
    }

    /// Number of content bytes fed since creation or the last reset.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Discard all input, keeping the domain.
    pub fn reset(&mut self) {
        *self = Self::new(self.domain);
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error)]
pub enum HasherError {
    #[error("failed to read content stream: {0}")]
    Read(#[source] io::Error),

    #[error("failed to rewind content stream: {0}")]
    Seek(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn hash_is_deterministic() {
        let id1 = ContentHasher::CONTENT.hash(b"hello world");
        let id2 = ContentHasher::CONTENT.hash(b"hello world");
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let other = ContentHasher::new("silo-test-v1");
        assert_ne!(other.hash(b"same"), ContentHasher::CONTENT.hash(b"same"));
    }

    #[test]
    fn streamed_digest_matches_slice_digest() {
        let data = vec![b'x'; 10_000];
        let hasher = ContentHasher::CONTENT.with_buffer_size(7);
        let digest = hasher.hash_reader(&mut Cursor::new(&data)).unwrap();
        assert_eq!(digest.hash, ContentHasher::CONTENT.hash(&data));
        assert_eq!(digest.size, 10_000);
    }

    #[test]
    fn empty_stream_hashes_like_empty_slice() {
        let digest = ContentHasher::CONTENT
            .hash_reader(&mut Cursor::new(Vec::new()))
            .unwrap();
        assert_eq!(digest.hash, ContentHasher::CONTENT.hash(b""));
        assert_eq!(digest.size, 0);
    }

    #[test]
    fn hash_seekable_rewinds_to_start() {
        let mut cursor = Cursor::new(b"Small file content".to_vec());
        let digest = ContentHasher::CONTENT.hash_seekable(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 0);
        assert_eq!(digest.hash, ContentHasher::CONTENT.hash(b"Small file content"));
    }

    #[test]
    fn hash_seekable_covers_full_content_from_middle() {
        let mut cursor = Cursor::new(b"Small file content".to_vec());
        cursor.set_position(5);
        let digest = ContentHasher::CONTENT.hash_seekable(&mut cursor).unwrap();
        assert_eq!(digest.hash, ContentHasher::CONTENT.hash(b"Small file content"));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn streaming_reset_discards_input() {
        let mut hasher = ContentHasher::CONTENT.streaming();
        hasher.update(b"garbage");
        hasher.reset();
        hasher.update(b"AAAA");
        assert_eq!(hasher.finalize(), ContentHasher::CONTENT.hash(b"AAAA"));
        assert_eq!(hasher.bytes_hashed(), 4);
    }

    #[test]
    fn read_errors_are_reported() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            }
        }
        let err = ContentHasher::CONTENT.hash_reader(&mut Broken).unwrap_err();
        assert!(matches!(err, HasherError::Read(_)));
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::CONTENT.hash(b"original");
        assert!(ContentHasher::CONTENT.verify(b"original", &id));
        assert!(!ContentHasher::CONTENT.verify(b"tampered", &id));
    }
}
