//! Content-addressable deduplication engine for Silo.
//!
//! Files are keyed by the digest of their bytes. The first upload of a given
//! content becomes the *canonical* file and owns the stored blob; every later
//! upload of the same content is recorded as a *duplicate* pointing at it.
//! This crate provides:
//! - Ingest with per-hash serialization ([`Silo::ingest`])
//! - Deletion with promotion of a duplicate ([`Silo::delete`])
//! - An idempotent consistency auditor ([`Silo::audit_consistency`])
//! - Whole-store reassignment from hashes ([`Silo::rebuild_all`])
//! - Storage accounting, analysis and bulk duplicate purge
//!
//! Nothing runs implicitly when a [`Silo`] is constructed.

pub mod accountant;
pub mod analysis;
pub mod audit;
pub mod config;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod purge;
pub mod rebuild;

#[cfg(test)]
mod properties;
#[cfg(test)]
mod testing;

pub use accountant::{FileSavings, StorageStats};
pub use analysis::{DuplicatedFile, MediaTypeUsage, MissingBlob, StorageAnalysis};
pub use audit::AuditReport;
pub use config::{BlobConfig, IngestConfig, SiloConfig};
pub use deletion::DeletionOutcome;
pub use engine::{FileView, Silo};
pub use error::{EngineError, EngineResult};
pub use ingest::{ContentSource, FileMetadata, IngestOutcome};
pub use purge::PurgeReport;
pub use rebuild::RebuildReport;
