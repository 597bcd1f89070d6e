//! KvStore
//!
//! The small capability interface shared by the bare [`MemTable`], the
//! [`Engine`] and a [`Transaction`]. Transactions are written against this
//! trait, not against a concrete engine.
//!
//! [`MemTable`]: crate::memtable::MemTable
//! [`Engine`]: crate::engine::Engine
//! [`Transaction`]: crate::txn::Transaction

use bytes::Bytes;

use crate::error::Result;
use crate::item::Item;
use crate::iterator::{live, ItemIter, RecordIter};

pub trait KvStore {
    /// Live value for `key`, or [`EmberError::NotFound`](crate::EmberError::NotFound)
    fn get(&self, key: &[u8]) -> Result<Bytes>;

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Record a tombstone for `key`
    fn remove(&mut self, key: &[u8]) -> Result<()>;

    /// Newest version of `key`, tombstones included
    fn lookup(&self, key: &[u8]) -> Result<Option<Item>>;

    /// Newest version of every key `>= from`, tombstones included
    fn items(&self, from: &[u8]) -> Result<ItemIter>;

    /// Live (key, value) pairs with key `>= from`
    fn iter(&self, from: &[u8]) -> Result<RecordIter> {
        Ok(live(self.items(from)?))
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_ok()
    }
}
