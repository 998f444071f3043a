use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::journal::SyncMode;

/// Record store settings, the `[records]` section of the Silo config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreConfig {
    /// Journal file. Without one the store lives in memory only.
    pub journal_path: Option<PathBuf>,
    pub sync_mode: SyncMode,
    /// Give up on lock acquisition after this many milliseconds.
    /// `None` waits indefinitely.
    pub lock_timeout_ms: Option<u64>,
    /// Stamped into every creation anchor this store issues.
    pub node_id: u16,
}

impl RecordStoreConfig {
    /// Durable store journaled at `path`.
    pub fn journaled(path: impl Into<PathBuf>) -> Self {
        Self {
            journal_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            sync_mode: SyncMode::default(),
            lock_timeout_ms: None,
            node_id: 0,
        }
    }
}
