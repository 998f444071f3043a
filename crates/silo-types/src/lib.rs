//! Foundation types for Silo, a content-deduplicating file store.
//!
//! Every other Silo crate depends on `silo-types`. The types here describe
//! the two tables the deduplication engine maintains and the identifiers
//! that link them.
//!
//! # Key Types
//!
//! - [`FileId`] / [`ReferenceId`]: UUID v7 row identifiers (time-ordered)
//! - [`ContentHash`]: BLAKE3 digest of a file's full content, the dedup key
//! - [`BlobLocation`]: opaque handle into the blob store
//! - [`TemporalAnchor`]: monotonic creation timestamp
//! - [`FileRecord`]: one stored logical file
//! - [`FileReference`]: one duplicate-to-canonical edge
//! - [`Standing`]: the stored canonical/duplicate flag of a record
//! - [`FileRole`]: the resolved role of a record, with its edges attached

pub mod error;
pub mod hash;
pub mod id;
pub mod location;
pub mod record;
pub mod temporal;

pub use error::TypeError;
pub use hash::ContentHash;
pub use id::{FileId, ReferenceId};
pub use location::BlobLocation;
pub use record::{FileRecord, FileReference, FileRole, Standing};
pub use temporal::TemporalAnchor;
