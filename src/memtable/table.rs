//! MemTable implementation
//!
//! Copy-on-write BTreeMap keyed by raw key bytes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{EmberError, Result};
use crate::item::Item;
use crate::iterator::ItemIter;
use crate::sequence::SequenceGenerator;
use crate::storage::{write_table_to_disk, TableInfo};
use crate::store::KvStore;

/// In-memory table for recent writes
pub struct MemTable {
    /// Newest item per key
    data: Arc<BTreeMap<Bytes, Item>>,
    /// Sum of `Item::size()` over `data`
    size: usize,
    /// `is_flush_needed()` once `size` exceeds this
    flush_threshold: usize,
    /// Timestamp source for upserts and tombstones
    sequence: Arc<SequenceGenerator>,
}

impl MemTable {
    /// Create an empty MemTable with its own timestamp source
    pub fn new(flush_threshold: usize) -> Self {
        Self::with_sequence(flush_threshold, Arc::new(SequenceGenerator::new()))
    }

    /// Create an empty MemTable stamping writes from a shared generator
    pub fn with_sequence(flush_threshold: usize, sequence: Arc<SequenceGenerator>) -> Self {
        Self {
            data: Arc::new(BTreeMap::new()),
            size: 0,
            flush_threshold,
            sequence,
        }
    }

    /// Insert or overwrite `key` with a freshly stamped value
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) {
        let item = Item::new(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            self.sequence.next(),
        );
        self.insert(item);
    }

    /// Insert a tombstone for `key`
    pub fn remove(&mut self, key: &[u8]) {
        let item = Item::tombstone(Bytes::copy_from_slice(key), self.sequence.next());
        self.insert(item);
    }

    /// Store an already-stamped item, replacing any previous version
    pub fn insert(&mut self, item: Item) {
        let added = item.size();
        let replaced = Arc::make_mut(&mut self.data)
            .insert(item.key().clone(), item)
            .map(|old| old.size())
            .unwrap_or(0);
        self.size = self.size + added - replaced;
    }

    /// Live value for `key`; a tombstone reads as NotFound
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        match self.data.get(key) {
            Some(item) if !item.is_removed() => Ok(item.value().clone()),
            _ => Err(EmberError::NotFound),
        }
    }

    /// Newest version of `key`, tombstones included
    pub fn get_item(&self, key: &[u8]) -> Option<&Item> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_ok()
    }

    /// Ascending items with key `>= from`, as of this call
    pub fn iter_from(&self, from: &[u8]) -> MemTableIterator {
        MemTableIterator {
            data: Arc::clone(&self.data),
            lower: Bound::Included(Bytes::copy_from_slice(from)),
        }
    }

    /// Encoded size of all entries (tombstones included)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entry_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn is_flush_needed(&self) -> bool {
        self.size > self.flush_threshold
    }

    /// Drop all entries and reset the size counter
    pub fn clear(&mut self) {
        self.data = Arc::new(BTreeMap::new());
        self.size = 0;
    }

    /// Write the whole table as a new SSTable in `dir`, then clear it
    ///
    /// The file only appears under its final name once fully written.
    /// On error the table is left untouched.
    pub fn flush(&mut self, dir: &Path) -> Result<TableInfo> {
        let info = write_table_to_disk(
            self.iter_from(&[]),
            dir,
            self.sequence.next(),
        )?;
        self.clear();
        Ok(info)
    }
}

impl KvStore for MemTable {
    fn get(&self, key: &[u8]) -> Result<Bytes> {
        MemTable::get(self, key)
    }

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        MemTable::upsert(self, key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        MemTable::remove(self, key);
        Ok(())
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Item>> {
        Ok(self.get_item(key).cloned())
    }

    fn items(&self, from: &[u8]) -> Result<ItemIter> {
        Ok(Box::new(self.iter_from(from)))
    }
}

/// Lazy snapshot iterator over MemTable entries
///
/// Each step is a range query strictly after the previously yielded key.
pub struct MemTableIterator {
    data: Arc<BTreeMap<Bytes, Item>>,
    lower: Bound<Bytes>,
}

impl Iterator for MemTableIterator {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        let (key, item) = self
            .data
            .range::<Bytes, _>((self.lower.clone(), Bound::Unbounded))
            .next()?;
        self.lower = Bound::Excluded(key.clone());
        Some(item.clone())
    }
}
