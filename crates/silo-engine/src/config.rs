use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use silo_crypto::hasher::DEFAULT_BUFFER_SIZE;
use silo_records::RecordStoreConfig;

use crate::error::{EngineError, EngineResult};

/// Top-level Silo configuration, usually read from `silo.toml`.
///
/// ```toml
/// [records]
/// journal_path = "/var/lib/silo/records.journal"
/// sync_mode = "every-write"
/// lock_timeout_ms = 5000
///
/// [blobs]
/// root = "/var/lib/silo/blobs"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiloConfig {
    pub records: RecordStoreConfig,
    pub blobs: BlobConfig,
    pub ingest: IngestConfig,
}

/// Blob storage backend selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Filesystem store root. In-memory when unset.
    pub root: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Chunk size used when hashing uploads.
    pub read_buffer_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl SiloConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// A volatile store is one whose records vanish on exit.
    pub fn is_volatile(&self) -> bool {
        self.records.journal_path.is_none()
    }
}
