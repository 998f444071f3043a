//! Content hashing for Silo.
//!
//! Provides the domain-separated BLAKE3 digest used as the deduplication
//! key. Hashing is streaming: inputs are read once in fixed-size chunks and
//! never buffered whole, and seekable sources are rewound afterwards so the
//! same bytes can be handed to the blob store.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, Digest, HasherError, StreamingHasher};
