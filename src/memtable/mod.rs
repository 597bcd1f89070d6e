//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Stamp every write with a fresh logical timestamp
//! - Track encoded size for flush triggers
//! - Ordered snapshot iteration for SSTable creation and merged reads
//!
//! ## Data Structure Choice
//! A `BTreeMap` behind an `Arc`:
//! - Ordered keys (required for SSTable generation)
//! - Iterators hold the `Arc`, so they see the table as it was when created;
//!   a later write copies the map only while such an iterator is alive
//! - Access is single-writer; callers needing threads wrap the owner in a lock

mod table;

pub use table::{MemTable, MemTableIterator};
