//! Configuration for EmberKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for an EmberKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── sstable_<id>.sst     (immutable tables)
    ///     └── transactions/<tag>/  (private overlay of each open transaction)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Flush the memtable once its accounted size exceeds this many bytes
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Compact all tables into one once more than this many tables exist
    pub compaction_threshold: usize,

    /// Keep tombstones when compacting
    ///
    /// Set for transaction overlays, whose deletes only take effect against
    /// the base store at commit.
    pub keep_tombstones: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./emberkv_data"),
            memtable_size_limit: 16 * 1024 * 1024, // 16 MB
            compaction_threshold: 8,
            keep_tombstones: false,
        }
    }
}

impl Config {
    /// Subdirectory holding transaction scratch directories
    pub const TRANSACTIONS_DIR: &'static str = "transactions";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory under which each open transaction gets `{tag}/`
    pub fn transactions_dir(&self) -> PathBuf {
        self.data_dir.join(Self::TRANSACTIONS_DIR)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the table count above which the engine compacts
    pub fn compaction_threshold(mut self, count: usize) -> Self {
        self.config.compaction_threshold = count;
        self
    }

    /// Keep tombstones through compaction (overlay engines)
    pub fn keep_tombstones(mut self, keep: bool) -> Self {
        self.config.keep_tombstones = keep;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
