//! # EmberKV
//!
//! An embedded, ordered key-value storage engine with:
//! - Log-structured storage: an in-memory MemTable flushed to immutable SSTables
//! - Memory-mapped SSTables with binary-search point lookups
//! - Merged reads where the most recent write (or delete) of a key wins
//! - Full compaction that drops shadowed versions and tombstones
//! - Transactions with private overlays and fail-fast per-key conflict detection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionalStore                         │
//! │        begin_transaction / commit_all / abort_all            │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌──────────────────────┐        ┌──────────────────────┐
//!   │     Transaction      │───────►│     Coordinator      │
//!   │  (overlay Engine)    │        │  key → tag locks     │
//!   └──────────┬───────────┘        └──────────────────────┘
//!              │ commit replays into
//!              ▼
//!   ┌──────────────────────────────────────────────┐
//!   │                   Engine                      │
//!   │   ┌─────────────┐        ┌────────────────┐   │
//!   │   │  MemTable   │ flush  │ StorageManager │   │
//!   │   │ (BTreeMap)  │───────►│   (SSTables)   │   │
//!   │   └─────────────┘        └────────────────┘   │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use emberkv::{Config, TransactionalStore};
//!
//! # fn main() -> emberkv::Result<()> {
//! let store = TransactionalStore::open(Config::builder().data_dir("/tmp/ember").build())?;
//!
//! let txn = store.begin_transaction("import")?;
//! txn.upsert(b"a", b"1")?;
//! assert!(store.storage().lock().get(b"a").is_err());
//! txn.commit()?;
//!
//! assert_eq!(&store.storage().lock().get(b"a")?[..], b"1");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod item;
pub mod sequence;
pub mod iterator;
pub mod store;
pub mod memtable;
pub mod storage;
pub mod engine;
pub mod txn;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EmberError, Result};
pub use config::Config;
pub use engine::Engine;
pub use item::Item;
pub use memtable::MemTable;
pub use sequence::SequenceGenerator;
pub use store::KvStore;
pub use txn::{Coordinator, Transaction, TransactionalStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
