use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque handle into the blob store.
///
/// The engine never interprets a location; it only compares them. Two
/// records naming the same location share physical bytes, and a blob is
/// released only once no record names its location.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobLocation(String);

impl BlobLocation {
    /// Wrap a backend-issued location string. Empty strings are rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TypeError::InvalidLocation("empty location".into()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobLocation({})", self.0)
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
