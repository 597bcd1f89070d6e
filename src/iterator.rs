//! Merge Iteration
//!
//! Combines several ascending [`Item`] streams (memtable, each SSTable, a
//! transaction overlay, ...) into the single view readers see.
//!
//! ```text
//!   source 0 ─┐
//!   source 1 ─┼─► MergeIterator ─► Collapse ─► live() ─► (key, value)
//!   source N ─┘   key ASC,         newest       drop
//!                 |ts| DESC        per key      tombstones
//! ```
//!
//! Sources carry no priority of their own: for equal keys the item with the
//! larger absolute timestamp wins, whether or not it is a tombstone.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::item::Item;

/// Lazy ascending stream of items
pub type ItemIter = Box<dyn Iterator<Item = Item> + Send>;

/// Lazy ascending stream of live (key, value) pairs
pub type RecordIter = Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>;

// =============================================================================
// K-way merge
// =============================================================================

struct HeapEntry {
    item: Item,
    source: usize,
    iter: ItemIter,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: reverse so the smallest key / newest write pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .item
            .merge_cmp(&self.item)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted sources; equal keys come out newest first
pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    pub fn new(sources: Vec<ItemIter>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, mut iter) in sources.into_iter().enumerate() {
            if let Some(item) = iter.next() {
                heap.push(HeapEntry { item, source, iter });
            }
        }
        Self { heap }
    }
}

impl Iterator for MergeIterator {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        let HeapEntry {
            item,
            source,
            mut iter,
        } = self.heap.pop()?;

        if let Some(next) = iter.next() {
            self.heap.push(HeapEntry {
                item: next,
                source,
                iter,
            });
        }
        Some(item)
    }
}

// =============================================================================
// Duplicate collapsing
// =============================================================================

/// Keeps the first item of every run of equal keys
pub struct Collapse<I> {
    inner: I,
    last_key: Option<Bytes>,
}

impl<I: Iterator<Item = Item>> Collapse<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            last_key: None,
        }
    }
}

impl<I: Iterator<Item = Item>> Iterator for Collapse<I> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            let item = self.inner.next()?;
            if self.last_key.as_ref() == Some(item.key()) {
                continue;
            }
            self.last_key = Some(item.key().clone());
            return Some(item);
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Merge and collapse: one item (the newest, tombstones included) per key
pub fn merge_items(sources: Vec<ItemIter>) -> ItemIter {
    Box::new(Collapse::new(MergeIterator::new(sources)))
}

/// Drop tombstones and strip timestamps
pub fn live(items: ItemIter) -> RecordIter {
    Box::new(
        items
            .filter(|item| !item.is_removed())
            .map(Item::into_record),
    )
}
