//! SSTable Iterator
//!
//! Forward iteration from a starting record index to the end of a table.

use crate::item::Item;

use super::SSTable;

/// Iterator over SSTable records in ascending key order
///
/// Holds its own handle on the table, so it outlives any borrow of the
/// owning storage manager.
pub struct SSTableIterator {
    table: SSTable,
    /// Next record to yield
    position: usize,
}

impl SSTableIterator {
    pub(super) fn new(table: SSTable, position: usize) -> Self {
        Self { table, position }
    }
}

impl Iterator for SSTableIterator {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        if self.position >= self.table.record_count() {
            return None;
        }

        match self.table.record(self.position) {
            Ok(record) => {
                self.position += 1;
                Some(record.to_item())
            }
            Err(e) => {
                // Validated on open, so this means the file changed underneath us
                tracing::warn!("Stopping scan of {}: {}", self.table.path().display(), e);
                self.position = self.table.record_count();
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.table.record_count().saturating_sub(self.position);
        (0, Some(remaining))
    }
}
