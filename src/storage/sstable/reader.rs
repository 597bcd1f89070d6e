//! SSTable Reader
//!
//! Memory-maps a table file and serves binary-search lookups directly from
//! the mapping. The offsets block gives O(1) access to record `i`, so no
//! index is loaded into memory.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::{EmberError, Result};
use crate::item::{Item, KEY_LEN_SIZE, TIMESTAMP_SIZE, VALUE_LEN_SIZE};

use super::iterator::SSTableIterator;
use super::{MIN_RECORD_SIZE, OFFSET_SIZE};

/// Borrowed view of one record inside the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub timestamp: i64,
}

impl RecordView<'_> {
    pub fn is_removed(&self) -> bool {
        self.timestamp < 0
    }

    /// Copy out of the mapping into an owned item
    pub fn to_item(&self) -> Item {
        Item::from_raw(
            Bytes::copy_from_slice(self.key),
            Bytes::copy_from_slice(self.value),
            self.timestamp,
        )
    }
}

/// Immutable, memory-mapped SSTable
///
/// Cloning is cheap: clones share the mapping, which stays valid until the
/// last clone (including any live iterator) is dropped.
#[derive(Clone)]
pub struct SSTable {
    path: PathBuf,
    map: Arc<Mmap>,
    /// Number of records (and of offsets)
    record_count: usize,
    /// Length of the records region; the offsets block starts here
    records_len: usize,
    /// Largest `abs(timestamp)` of any record
    max_timestamp: i64,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("record_count", &self.record_count)
            .field("file_size", &self.map.len())
            .finish()
    }
}

impl SSTable {
    /// Open and validate an SSTable
    ///
    /// Fails with [`EmberError::Format`] when the file is too small, the
    /// record count is inconsistent with the file size, or any record does
    /// not decode exactly between its offsets.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < OFFSET_SIZE {
            return Err(EmberError::Format(format!(
                "{}: {} bytes is too small for a record count",
                path.display(),
                file_size
            )));
        }

        // SAFETY: table files are never modified after publication
        let map = unsafe { Mmap::map(&file)? };

        let count_start = map.len() - OFFSET_SIZE as usize;
        let record_count = read_i64(&map, count_start)?;

        let too_many = u64::try_from(record_count)
            .ok()
            .and_then(|count| count.checked_mul(MIN_RECORD_SIZE))
            .map_or(true, |min_size| file_size <= min_size);
        if too_many {
            return Err(EmberError::Format(format!(
                "{}: record count {} does not fit in {} bytes",
                path.display(),
                record_count,
                file_size
            )));
        }

        // Bounded by the check above, so neither conversion nor subtraction overflows
        let record_count = record_count as usize;
        let records_len = map.len() - (record_count + 1) * OFFSET_SIZE as usize;

        let mut table = Self {
            path: path.to_path_buf(),
            map: Arc::new(map),
            record_count,
            records_len,
            max_timestamp: 0,
        };
        table.max_timestamp = table.validate()?;

        Ok(table)
    }

    /// Decode every record once; returns the largest `abs(timestamp)`
    fn validate(&self) -> Result<i64> {
        let mut max_timestamp = 0i64;
        let mut previous: Option<&[u8]> = None;

        for index in 0..self.record_count {
            let record = self.record(index)?;
            if previous.map_or(false, |prev| prev >= record.key) {
                return Err(EmberError::Format(format!(
                    "{}: record {} is out of key order",
                    self.path.display(),
                    index
                )));
            }
            previous = Some(record.key);
            max_timestamp = max_timestamp.max(record.timestamp.saturating_abs());
        }

        Ok(max_timestamp)
    }

    /// Record `index` as a view into the mapping
    pub fn record(&self, index: usize) -> Result<RecordView<'_>> {
        let start = self.offset(index)?;
        let end = if index + 1 < self.record_count {
            self.offset(index + 1)?
        } else {
            self.records_len
        };

        let bytes = self
            .map
            .get(start..end)
            .filter(|_| end <= self.records_len)
            .ok_or_else(|| self.corrupt(index, "offsets out of range"))?;

        decode_record(bytes).ok_or_else(|| self.corrupt(index, "malformed record"))
    }

    /// First index whose key is `>= key` (`record_count` if none)
    ///
    /// Fails with Format if a record visited by the search no longer decodes.
    pub fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        let mut left = 0;
        let mut right = self.record_count;
        while left < right {
            let mid = left + (right - left) / 2;
            if self.record(mid)?.key < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        Ok(left)
    }

    /// Newest version of `key` stored in this table, tombstones included
    pub fn get_item(&self, key: &[u8]) -> Result<Option<Item>> {
        let index = self.lower_bound(key)?;
        if index >= self.record_count {
            return Ok(None);
        }
        let record = self.record(index)?;
        Ok((record.key == key).then(|| record.to_item()))
    }

    /// Ascending items starting at the first key `>= from`
    ///
    /// A table that fails to decode yields nothing and logs a warning, the
    /// same way a scan stops when it meets a bad record.
    pub fn iter_from(&self, from: &[u8]) -> SSTableIterator {
        let position = self.lower_bound(from).unwrap_or_else(|e| {
            tracing::warn!("Skipping scan of {}: {}", self.path.display(), e);
            self.record_count
        });
        SSTableIterator::new(self.clone(), position)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn file_size(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn offset(&self, index: usize) -> Result<usize> {
        let raw = read_i64(&self.map, self.records_len + index * OFFSET_SIZE as usize)?;
        usize::try_from(raw).map_err(|_| self.corrupt(index, "negative offset"))
    }

    fn corrupt(&self, index: usize, what: &str) -> EmberError {
        EmberError::Format(format!(
            "{}: record {}: {}",
            self.path.display(),
            index,
            what
        ))
    }
}

/// Decode `[key_len][key][ts]([value_len][value])`, requiring an exact fit
fn decode_record(bytes: &[u8]) -> Option<RecordView<'_>> {
    let key_len = usize::try_from(i32::from_be_bytes(take(bytes, 0)?)).ok()?;
    let key_end = KEY_LEN_SIZE.checked_add(key_len)?;
    let key = bytes.get(KEY_LEN_SIZE..key_end)?;

    let timestamp = i64::from_be_bytes(take(bytes, key_end)?);
    let value_start = key_end + TIMESTAMP_SIZE;

    let (value, end) = if timestamp >= 0 {
        let value_len = usize::try_from(i64::from_be_bytes(take(bytes, value_start)?)).ok()?;
        let data_start = value_start + VALUE_LEN_SIZE;
        let data_end = data_start.checked_add(value_len)?;
        (bytes.get(data_start..data_end)?, data_end)
    } else {
        (&[][..], value_start)
    };

    (end == bytes.len()).then_some(RecordView {
        key,
        value,
        timestamp,
    })
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Option<[u8; N]> {
    bytes.get(at..at.checked_add(N)?)?.try_into().ok()
}

fn read_i64(bytes: &[u8], at: usize) -> Result<i64> {
    take::<8>(bytes, at)
        .map(i64::from_be_bytes)
        .ok_or_else(|| EmberError::Format(format!("read past end of table at {}", at)))
}
