//! Transactional record store for Silo.
//!
//! Holds the two tables the deduplication engine maintains, file records
//! and duplicate-to-canonical reference edges, and gives the engine a
//! serializable read-modify-write unit over them.
//!
//! # Concurrency
//!
//! Row locks are emulated by a [`LockTable`] keyed on content hash. A
//! transaction over [`LockScope::HashGroup`] serializes with every other
//! transaction on the same hash and runs in parallel with the rest. Whole
//! store repairs take [`LockScope::Exclusive`].
//!
//! # Durability
//!
//! With a journal path configured, every commit appends its change-set to a
//! CRC-framed [`Journal`] before touching memory, and [`RecordStore::open`]
//! replays it. Without one the store is volatile.

pub mod config;
pub mod error;
pub mod journal;
pub mod lock;
pub mod store;
pub mod table;
pub mod tx;

pub use config::RecordStoreConfig;
pub use error::{RecordError, RecordResult};
pub use journal::{Journal, JournalEntry, SyncMode};
pub use lock::{LockGuard, LockScope, LockTable};
pub use store::RecordStore;
pub use table::{Change, RecordTable, TableSnapshot};
pub use tx::Transaction;
