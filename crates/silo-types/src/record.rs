use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;
use crate::id::{FileId, ReferenceId};
use crate::location::BlobLocation;
use crate::temporal::TemporalAnchor;

/// The stored canonical/duplicate flag of a file record.
///
/// This is what the record table persists. It can disagree with the edge
/// table after a partial failure, which is exactly what the consistency
/// auditor looks for. Use [`FileRole`] for the resolved view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Standing {
    /// Owns the stored bytes for its hash group.
    Canonical,
    /// Points at the canonical of its hash group through a reference edge.
    Duplicate,
}

impl Standing {
    pub fn is_canonical(self) -> bool {
        matches!(self, Self::Canonical)
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical => write!(f, "canonical"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// One stored logical file.
///
/// The content hash and size are fixed at construction and have no
/// setters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub location: BlobLocation,
    pub display_name: String,
    pub media_type: String,
    pub created_at: TemporalAnchor,
    pub standing: Standing,
    content_hash: ContentHash,
    size: u64,
}

impl FileRecord {
    pub fn new(
        location: BlobLocation,
        display_name: impl Into<String>,
        media_type: impl Into<String>,
        content_hash: ContentHash,
        size: u64,
        created_at: TemporalAnchor,
        standing: Standing,
    ) -> Self {
        Self {
            id: FileId::new(),
            location,
            display_name: display_name.into(),
            media_type: media_type.into(),
            created_at,
            standing,
            content_hash,
            size,
        }
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_canonical(&self) -> bool {
        self.standing.is_canonical()
    }

    /// Deterministic tie-break key: earliest creation anchor, then id.
    pub fn creation_key(&self) -> (TemporalAnchor, FileId) {
        (self.created_at, self.id)
    }
}

/// One duplicate-to-canonical edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub id: ReferenceId,
    /// The canonical file this edge points to.
    pub canonical: FileId,
    /// The duplicate file this edge originates from.
    pub duplicate: FileId,
    pub created_at: TemporalAnchor,
}

impl FileReference {
    /// Create an edge from `duplicate` to `canonical`. Self references are
    /// rejected.
    pub fn new(
        canonical: FileId,
        duplicate: FileId,
        created_at: TemporalAnchor,
    ) -> Result<Self, TypeError> {
        if canonical == duplicate {
            return Err(TypeError::SelfReference(canonical.to_string()));
        }
        Ok(Self {
            id: ReferenceId::new(),
            canonical,
            duplicate,
            created_at,
        })
    }

    /// Deterministic tie-break key used when choosing a promotion target.
    pub fn creation_key(&self) -> (TemporalAnchor, ReferenceId) {
        (self.created_at, self.id)
    }
}

/// Resolved role of a file within its hash group.
///
/// Unlike [`Standing`], a role carries the edges that justify it, so a
/// duplicate without its reference cannot be expressed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRole {
    Canonical {
        /// Duplicates pointing here, in reference creation order.
        duplicates: Vec<FileId>,
    },
    Duplicate {
        canonical: FileId,
        reference: ReferenceId,
    },
}

impl FileRole {
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical { .. })
    }

    pub fn duplicate_count(&self) -> usize {
        match self {
            Self::Canonical { duplicates } => duplicates.len(),
            Self::Duplicate { .. } => 0,
        }
    }

    pub fn canonical_id(&self) -> Option<FileId> {
        match self {
            Self::Canonical { .. } => None,
            Self::Duplicate { canonical, .. } => Some(*canonical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(at: TemporalAnchor) -> FileRecord {
        FileRecord::new(
            BlobLocation::new("loc").unwrap(),
            "a.txt",
            "text/plain",
            ContentHash::of(b"a"),
            1,
            at,
            Standing::Canonical,
        )
    }

    #[test]
    fn self_reference_is_rejected() {
        let id = FileId::new();
        let err = FileReference::new(id, id, TemporalAnchor::zero()).unwrap_err();
        assert!(matches!(err, TypeError::SelfReference(_)));
    }

    #[test]
    fn role_accessors() {
        let canonical = FileRole::Canonical {
            duplicates: vec![FileId::new(), FileId::new()],
        };
        assert!(canonical.is_canonical());
        assert_eq!(canonical.duplicate_count(), 2);
        assert_eq!(canonical.canonical_id(), None);

        let target = FileId::new();
        let duplicate = FileRole::Duplicate {
            canonical: target,
            reference: ReferenceId::new(),
        };
        assert_eq!(duplicate.duplicate_count(), 0);
        assert_eq!(duplicate.canonical_id(), Some(target));
    }

    #[test]
    fn record_serde_keeps_hash_and_size() {
        let rec = record(TemporalAnchor::new(5, 0, 0));
        let json = serde_json::to_string(&rec).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.size(), 1);
        assert_eq!(back.content_hash(), &ContentHash::of(b"a"));
    }

    proptest! {
        #[test]
        fn creation_key_orders_by_anchor_before_id(
            a_ms in 0u64..1_000,
            b_ms in 0u64..1_000,
            a_logical in 0u32..4,
            b_logical in 0u32..4,
        ) {
            let a = record(TemporalAnchor::new(a_ms, a_logical, 0));
            let b = record(TemporalAnchor::new(b_ms, b_logical, 0));
            if a.created_at != b.created_at {
                prop_assert_eq!(
                    a.creation_key() < b.creation_key(),
                    a.created_at < b.created_at
                );
            } else {
                prop_assert_eq!(a.creation_key() < b.creation_key(), a.id < b.id);
            }
        }
    }
}
