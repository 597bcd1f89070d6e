//! SSTable Builder
//!
//! Streams sorted items to a temporary file, appends the offset table and
//! record count, then publishes the file with an atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{EmberError, Result};
use crate::item::Item;

use super::{table_path, temp_path, TableInfo, OFFSET_SIZE};

/// Builder for creating new SSTables from sorted, deduplicated items
pub struct SSTableBuilder {
    /// Path the table is renamed to on `finish()`
    path: PathBuf,
    /// Path written while the table is incomplete
    temp_path: PathBuf,
    /// Buffered writer; `None` once finished
    writer: Option<BufWriter<File>>,
    /// Start of each record within the records region
    offsets: Vec<u64>,
    /// Bytes of records written so far
    current_offset: u64,
}

impl SSTableBuilder {
    /// Create a builder that will publish the table at `path`
    ///
    /// Nothing exists at `path` until `finish()` succeeds. If the builder is
    /// dropped unfinished, the temporary file is removed.
    pub fn new(path: &Path) -> Result<Self> {
        let temp_path = temp_path(path);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(file)),
            offsets: Vec::new(),
            current_offset: 0,
        })
    }

    /// Append a record (must be called in ascending key order)
    pub fn add(&mut self, item: &Item) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EmberError::Storage("SSTable builder already finished".to_string()))?;

        let key_len = i32::try_from(item.key().len()).map_err(|_| {
            EmberError::Storage(format!("Key of {} bytes is too large", item.key().len()))
        })?;

        // [key_len(4)][key][timestamp(8)]
        writer.write_all(&key_len.to_be_bytes())?;
        writer.write_all(item.key())?;
        writer.write_all(&item.timestamp().to_be_bytes())?;

        // [value_len(8)][value] for live records only
        if !item.is_removed() {
            let value_len = i64::try_from(item.value().len()).map_err(|_| {
                EmberError::Storage(format!("Value of {} bytes is too large", item.value().len()))
            })?;
            writer.write_all(&value_len.to_be_bytes())?;
            writer.write_all(item.value())?;
        }

        self.offsets.push(self.current_offset);
        self.current_offset += item.size() as u64;
        Ok(())
    }

    /// Number of records added so far
    pub fn record_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// Write offsets and count, sync, and rename into place
    pub fn finish(mut self) -> Result<TableInfo> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| EmberError::Storage("SSTable builder already finished".to_string()))?;

        if let Err(e) = self.publish(writer) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e);
        }

        let record_count = self.record_count();
        let file_size = self.current_offset + (record_count + 1) * OFFSET_SIZE;
        tracing::trace!(
            "Published SSTable {} ({} records, {} bytes)",
            self.path.display(),
            record_count,
            file_size
        );

        Ok(TableInfo {
            path: self.path.clone(),
            record_count,
            file_size,
        })
    }

    fn publish(&self, mut writer: BufWriter<File>) -> Result<()> {
        // Offsets block: one i64 per record
        for offset in &self.offsets {
            writer.write_all(&(*offset as i64).to_be_bytes())?;
        }

        // Trailer: record count
        writer.write_all(&(self.record_count() as i64).to_be_bytes())?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir);
        }
        Ok(())
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        // Still holding the writer means finish() never completed
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                tracing::warn!(
                    "Failed to remove unfinished SSTable {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
    }
}

/// Write `items` as table `id` in `dir`
///
/// `items` must be ascending by key with at most one item per key.
pub fn write_table_to_disk<I>(items: I, dir: &Path, id: i64) -> Result<TableInfo>
where
    I: IntoIterator<Item = Item>,
{
    let mut builder = SSTableBuilder::new(&table_path(dir, id))?;
    for item in items {
        builder.add(&item)?;
    }
    builder.finish()
}

/// Make the rename durable; failure here only weakens crash guarantees
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
