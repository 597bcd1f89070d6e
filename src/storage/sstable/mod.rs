//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted record storage.
//!
//! ## File Format
//! All integers are big-endian.
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Records (variable)                                      │
//! │   [KeyLen: i32][Key][Timestamp: i64]                    │
//! │   [ValueLen: i64][Value]   <- only when Timestamp >= 0  │
//! │   ... repeated for each record, ascending key ...       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Offsets (RecordCount x 8 bytes)                         │
//! │   [Offset: i64] start of record i within Records        │
//! ├─────────────────────────────────────────────────────────┤
//! │ RecordCount: i64 (8)                                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A negative timestamp is a tombstone and carries no value. Files are
//! written under `<name>.sst.tmp` and renamed to `<name>.sst` once complete,
//! so only finished tables ever carry the table extension.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

pub use builder::{write_table_to_disk, SSTableBuilder};
pub use iterator::SSTableIterator;
pub use reader::{RecordView, SSTable};

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Extension of a complete, immutable table
pub const TABLE_EXTENSION: &str = "sst";

/// Suffix appended while a table is being written
pub const TEMP_SUFFIX: &str = ".tmp";

/// Size of each offset entry and of the trailing record count
pub(crate) const OFFSET_SIZE: u64 = 8;

/// Lower bound on an encoded record, used to sanity-check the record count
pub(crate) const MIN_RECORD_SIZE: u64 = 21;

// =============================================================================
// Table Metadata
// =============================================================================

/// Summary of a table produced by [`SSTableBuilder::finish`]
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Final (published) path of the table
    pub path: PathBuf,
    /// Number of records written
    pub record_count: u64,
    /// File size in bytes
    pub file_size: u64,
}

// =============================================================================
// Naming
// =============================================================================

/// Path of table `id` inside `dir`
pub fn table_path(dir: &Path, id: i64) -> PathBuf {
    dir.join(format!("sstable_{:020}.{}", id, TABLE_EXTENSION))
}

/// Id encoded in a table file name by [`table_path`]
pub fn table_id(path: &Path) -> Option<i64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("sstable_")?
        .parse()
        .ok()
}

/// In-progress path for a table about to be published at `path`
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// True only for the final table extension (`.sst`, not `.sst.tmp`)
pub fn is_table_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == TABLE_EXTENSION)
}

/// True for a leftover in-progress table write
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| {
            name.ends_with(&format!(".{}{}", TABLE_EXTENSION, TEMP_SUFFIX))
        })
}
