use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use silo_crypto::ContentHasher;
use silo_types::BlobLocation;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::traits::{content_location, is_content_location, BlobStore};

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "tmp";

/// Filesystem blob store with a sharded, content-addressed layout.
///
/// ```text
/// <root>/
///   objects/
///     a3/
///       f2e1d4c5b6a7...   (remaining 62 hex chars of the digest)
///   tmp/                  (staging area for in-flight writes)
/// ```
///
/// Writes stream into a staging file while hashing, then rename into place,
/// so a crash never leaves a partially written blob under `objects/`.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    hasher: ContentHasher,
}

impl FsBlobStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(STAGING_DIR))?;
        debug!(root = %root.display(), "opened filesystem blob store");
        Ok(Self {
            root,
            hasher: ContentHasher::CONTENT,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &BlobLocation) -> BlobResult<PathBuf> {
        if !is_content_location(location) {
            return Err(BlobError::MalformedLocation(location.clone()));
        }
        Ok(self.root.join(OBJECTS_DIR).join(location.as_str()))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, content: &mut dyn Read) -> BlobResult<BlobLocation> {
        let mut staged = tempfile::NamedTempFile::new_in(self.root.join(STAGING_DIR))?;
        let mut hasher = self.hasher.streaming();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            staged.write_all(&buf[..n])?;
        }
        staged.flush()?;
        staged.as_file().sync_all()?;

        let location = content_location(&hasher.finalize())?;
        let dest = self.path_for(&location)?;
        if dest.is_file() {
            // Identical content is already in place; the staged copy is
            // removed when `staged` drops.
            debug!(%location, "blob already present");
            return Ok(location);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        staged.persist(&dest).map_err(|e| BlobError::Io(e.error))?;
        debug!(%location, bytes = hasher.bytes_hashed(), "blob written");
        Ok(location)
    }

    fn get(&self, location: &BlobLocation) -> BlobResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(location)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, location: &BlobLocation) -> BlobResult<bool> {
        match fs::remove_file(self.path_for(location)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, location: &BlobLocation) -> BlobResult<bool> {
        Ok(self.path_for(location)?.try_exists()?)
    }
}
