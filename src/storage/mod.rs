//! Storage Module
//!
//! Persistent storage layer built from immutable SSTables.
//!
//! ## Responsibilities
//! - Persist sorted runs to disk with atomic publication
//! - Binary-search point lookups and ranged scans over memory-mapped files
//! - Discover existing tables on startup, skipping corrupt ones
//! - Replace every table with one compacted table

pub mod sstable;
mod manager;

pub use manager::StorageManager;
pub use sstable::{
    is_table_file, table_id, table_path, write_table_to_disk, RecordView, SSTable, SSTableBuilder,
    SSTableIterator, TableInfo,
};
