//! Engine Module
//!
//! The storage engine that merges one MemTable and many SSTables into a
//! single consistent sorted view.
//!
//! ## Responsibilities
//! - Route writes to the MemTable
//! - Flush the MemTable when it crosses the size limit
//! - Compact all tables once there are too many of them
//! - Answer reads from the newest version of each key across all sources
//!
//! ## Concurrency Model
//! Single writer. Every mutating method takes `&mut self`; callers sharing an
//! engine between threads wrap it in a lock (the transaction layer uses a
//! `parking_lot::Mutex`). Flush and compaction run synchronously on the write
//! path and never overlap.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::item::Item;
use crate::iterator::{live, merge_items, ItemIter, RecordIter};
use crate::memtable::MemTable;
use crate::sequence::SequenceGenerator;
use crate::storage::StorageManager;
use crate::store::KvStore;

/// The LSM storage engine
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// In-memory table for recent writes
    memtable: MemTable,

    /// On-disk tables
    storage: StorageManager,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Load every valid SSTable (corrupt ones are skipped with a warning)
    /// 3. Compact immediately if too many tables were found
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_sequence(config, Arc::new(SequenceGenerator::new()))
    }

    /// Open with a path and flush threshold (convenience method)
    ///
    /// Uses the default config for everything else
    pub fn open_path(path: &Path, flush_threshold_bytes: usize) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path)
            .memtable_size_limit(flush_threshold_bytes)
            .build();
        Self::open(config)
    }

    /// Open sharing a timestamp source with other stores
    pub fn open_with_sequence(config: Config, sequence: Arc<SequenceGenerator>) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage = StorageManager::open(&config.data_dir, Arc::clone(&sequence))?;
        let memtable = MemTable::with_sequence(config.memtable_size_limit, sequence);

        let mut engine = Self {
            config,
            memtable,
            storage,
        };

        tracing::info!(
            "Opened {} with {} SSTables",
            engine.config.data_dir.display(),
            engine.storage.sstable_count()
        );

        if engine.needs_compaction() {
            engine.compact()?;
        }

        Ok(engine)
    }

    /// Get a value by key
    ///
    /// Fails with NotFound when the key is absent or its newest version is
    /// a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        match self.lookup(key)? {
            Some(item) if !item.is_removed() => Ok(item.value().clone()),
            _ => Err(EmberError::NotFound),
        }
    }

    /// Newest version of `key` across the MemTable and all SSTables
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Item>> {
        let in_memory = self.memtable.get_item(key).cloned();
        let on_disk = self.storage.get_item(key)?;

        Ok(match (in_memory, on_disk) {
            (Some(a), Some(b)) => Some(if a.timestamp_abs() >= b.timestamp_abs() { a } else { b }),
            (a, b) => a.or(b),
        })
    }

    /// Insert or overwrite a key
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.memtable.upsert(key, value);
        self.maybe_flush()
    }

    /// Delete a key (writes a tombstone)
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.memtable.remove(key);
        self.maybe_flush()
    }

    /// Newest version of every key `>= from`, tombstones included
    pub fn items(&self, from: &[u8]) -> ItemIter {
        let mut sources: Vec<ItemIter> = Vec::with_capacity(self.storage.sstable_count() + 1);
        sources.push(Box::new(self.memtable.iter_from(from)));
        sources.extend(self.storage.iterators(from));
        merge_items(sources)
    }

    /// Live (key, value) pairs with key `>= from`, ascending
    pub fn iter(&self, from: &[u8]) -> RecordIter {
        live(self.items(from))
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size; no-op when empty
    pub fn flush(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.storage.flush(&mut self.memtable)?;

        if self.needs_compaction() {
            self.compact()?;
        }
        Ok(())
    }

    /// Merge the MemTable and every SSTable into one table
    ///
    /// Shadowed versions are dropped. Tombstones are dropped too unless
    /// `keep_tombstones` is set. The memtable is cleared only after the
    /// compacted table has been published.
    pub fn compact(&mut self) -> Result<()> {
        let tables_before = self.storage.sstable_count();
        let merged = self.items(&[]);
        let merged: ItemIter = if self.config.keep_tombstones {
            merged
        } else {
            Box::new(merged.filter(|item| !item.is_removed()))
        };

        let info = self.storage.compact(merged)?;
        self.memtable.clear();

        tracing::info!(
            "Compacted {} SSTables into {} ({} records)",
            tables_before,
            info.as_ref()
                .map_or_else(|| "nothing".to_string(), |i| i.path.display().to_string()),
            info.as_ref().map_or(0, |i| i.record_count)
        );
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Flushes the memtable even below the size limit so no write is lost.
    pub fn close(&mut self) -> Result<()> {
        self.flush()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn maybe_flush(&mut self) -> Result<()> {
        if self.memtable.is_flush_needed() {
            self.flush()?;
        }
        Ok(())
    }

    fn needs_compaction(&self) -> bool {
        self.storage.sstable_count() > self.config.compaction_threshold
    }
}

impl KvStore for Engine {
    fn get(&self, key: &[u8]) -> Result<Bytes> {
        Engine::get(self, key)
    }

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::upsert(self, key, value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        Engine::remove(self, key)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Item>> {
        Engine::lookup(self, key)
    }

    fn items(&self, from: &[u8]) -> Result<ItemIter> {
        Ok(Engine::items(self, from))
    }
}
