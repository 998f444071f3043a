//! Blob storage for Silo.
//!
//! The deduplication engine treats physical byte storage as an external
//! collaborator reached through the [`BlobStore`] trait. Both bundled
//! backends are content-addressed: `put` names a blob after the digest of
//! its bytes, so writing the same content twice yields the same
//! [`BlobLocation`](silo_types::BlobLocation) and a single physical copy.
//!
//! # Storage Backends
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlobStore`] -- sharded directory tree (`objects/ab/cdef...`)
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written.
//! 2. `put` is idempotent for identical content.
//! 3. The store never decides when a blob is garbage; callers delete a
//!    location only after checking that no record still names it.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;
