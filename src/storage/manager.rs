//! Storage Manager
//!
//! Manages the set of SSTables in one directory.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup (corrupt files are skipped)
//! - Clean up in-progress writes left behind by a crash
//! - Create new SSTables from MemTable flushes
//! - Replace every table with a single compacted one

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::item::Item;
use crate::iterator::ItemIter;
use crate::memtable::MemTable;
use crate::sequence::SequenceGenerator;

use super::sstable::{is_table_file, is_temp_file, table_id};
use super::{write_table_to_disk, SSTable, TableInfo};

/// Manages the storage layer
///
/// Table order carries no meaning: reads resolve duplicates by timestamp,
/// not by position in the list.
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open tables
    sstables: Vec<SSTable>,

    /// Source of fresh table ids; shared with the engine's memtable
    sequence: Arc<SequenceGenerator>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftover `.sst.tmp` files
    /// 3. Open every regular `.sst` file, skipping ones that fail validation
    /// 4. Raise the sequence floor above every timestamp and table id found
    ///    on disk
    pub fn open(path: &Path, sequence: Arc<SequenceGenerator>) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstables = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_path = entry.path();
            if is_temp_file(&file_path) {
                tracing::warn!("Removing unfinished SSTable {}", file_path.display());
                fs::remove_file(&file_path)?;
                continue;
            }
            if !is_table_file(&file_path) {
                continue;
            }

            // Ids come from the same sequence, so new names never collide
            if let Some(id) = table_id(&file_path) {
                sequence.observe(id);
            }

            match SSTable::open(&file_path) {
                Ok(table) => {
                    sequence.observe(table.max_timestamp());
                    sstables.push(table);
                }
                Err(e) => {
                    tracing::warn!("Skipping SSTable {}: {}", file_path.display(), e);
                }
            }
        }

        // Stable order for debugging; reads do not depend on it
        sstables.sort_by(|a, b| a.path().cmp(b.path()));

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables,
            sequence,
        })
    }

    /// Newest version of `key` across all tables, tombstones included
    pub fn get_item(&self, key: &[u8]) -> Result<Option<Item>> {
        let mut newest: Option<Item> = None;
        for table in &self.sstables {
            if let Some(item) = table.get_item(key)? {
                if newest.as_ref().map_or(true, |n| item.timestamp_abs() > n.timestamp_abs()) {
                    newest = Some(item);
                }
            }
        }
        Ok(newest)
    }

    /// One ascending source per table, each starting at `from`
    pub fn iterators(&self, from: &[u8]) -> Vec<ItemIter> {
        self.sstables
            .iter()
            .map(|table| Box::new(table.iter_from(from)) as ItemIter)
            .collect()
    }

    /// Flush a MemTable to a new SSTable
    ///
    /// The new table is registered before the memtable is cleared, so a
    /// failure at any step leaves the memtable contents in place.
    pub fn flush(&mut self, memtable: &mut MemTable) -> Result<TableInfo> {
        let info = self.write(memtable.iter_from(&[]))?;
        memtable.clear();

        tracing::debug!(
            "Flushed memtable to {} ({} records, {} bytes)",
            info.path.display(),
            info.record_count,
            info.file_size
        );
        Ok(info)
    }

    /// Replace every table with one built from `items`
    ///
    /// `items` must already be merged, collapsed and free of tombstones.
    /// Order: publish the new table, swap the list, then delete old files.
    pub fn compact(&mut self, items: ItemIter) -> Result<Option<TableInfo>> {
        let mut items = items.peekable();

        let (info, replacement) = if items.peek().is_some() {
            let info = write_table_to_disk(items, &self.data_dir, self.sequence.next())?;
            let table = SSTable::open(&info.path)?;
            (Some(info), vec![table])
        } else {
            (None, Vec::new())
        };

        let old = std::mem::replace(&mut self.sstables, replacement);
        let mut first_error = None;
        for table in &old {
            if let Err(e) = fs::remove_file(table.path()) {
                tracing::warn!("Failed to delete {}: {}", table.path().display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(info),
        }
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.len()
    }

    /// Open tables (unordered)
    pub fn sstables(&self) -> &[SSTable] {
        &self.sstables
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Write `items` as a new table and register it
    fn write<I>(&mut self, items: I) -> Result<TableInfo>
    where
        I: IntoIterator<Item = Item>,
    {
        let info = write_table_to_disk(items, &self.data_dir, self.sequence.next())?;
        let table = SSTable::open(&info.path)?;
        self.sstables.push(table);
        Ok(info)
    }
}
