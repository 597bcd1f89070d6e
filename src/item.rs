//! Item
//!
//! The atomic unit stored by every layer: a key, a value and a signed
//! logical timestamp. A negative timestamp marks a tombstone.

use std::cmp::Ordering;

use bytes::Bytes;

/// Bytes of a key length prefix (i32)
pub const KEY_LEN_SIZE: usize = 4;

/// Bytes of a timestamp (i64)
pub const TIMESTAMP_SIZE: usize = 8;

/// Bytes of a value length prefix (i64)
pub const VALUE_LEN_SIZE: usize = 8;

/// A versioned key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: Bytes,
    value: Bytes,
    timestamp: i64,
}

impl Item {
    /// A live write at `timestamp` (must be positive)
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// A deletion marker; stores the negated timestamp and an empty value
    pub fn tombstone(key: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value: Bytes::new(),
            timestamp: -timestamp.abs(),
        }
    }

    /// Restore an item exactly as it was encoded on disk
    pub(crate) fn from_raw(key: Bytes, value: Bytes, timestamp: i64) -> Self {
        Self {
            key,
            value,
            timestamp,
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Signed timestamp as stored (negative for tombstones)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Write time regardless of tombstone status
    pub fn timestamp_abs(&self) -> i64 {
        self.timestamp.saturating_abs()
    }

    pub fn is_removed(&self) -> bool {
        self.timestamp < 0
    }

    /// Encoded size: key_len(4) + key + timestamp(8) [+ value_len(8) + value]
    ///
    /// The memtable flush threshold is computed from this figure.
    pub fn size(&self) -> usize {
        let base = KEY_LEN_SIZE + self.key.len() + TIMESTAMP_SIZE;
        if self.is_removed() {
            base
        } else {
            base + VALUE_LEN_SIZE + self.value.len()
        }
    }

    /// Split into the externally visible (key, value) pair
    pub fn into_record(self) -> (Bytes, Bytes) {
        (self.key, self.value)
    }

    /// Merge order: ascending key, then the most recent write first
    pub fn merge_cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.timestamp_abs().cmp(&self.timestamp_abs()))
    }
}
