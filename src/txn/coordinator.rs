//! Transaction Coordinator
//!
//! Registry of open transactions plus the global key → tag lock table.
//! Conflict detection is fail-fast: nothing here ever waits.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::config::Config;
use crate::error::{EmberError, Result};

use super::transaction::TxnCore;

/// Tracks open transactions and the keys they hold
pub struct Coordinator<S> {
    /// Parent of every transaction's scratch directory
    root: PathBuf,

    /// Flush threshold handed to each overlay
    flush_threshold: usize,

    /// Compaction threshold handed to each overlay
    compaction_threshold: usize,

    /// Open transactions by tag
    transactions: HashMap<String, Weak<TxnCore<S>>>,

    /// Key → tag of the transaction holding an uncommitted write on it
    locks: HashMap<Bytes, String>,
}

impl<S> Coordinator<S> {
    pub fn new(root: impl Into<PathBuf>, flush_threshold: usize, compaction_threshold: usize) -> Self {
        Self {
            root: root.into(),
            flush_threshold,
            compaction_threshold,
            transactions: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    /// Coordinator whose overlays inherit `config`'s thresholds
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.transactions_dir(),
            config.memtable_size_limit,
            config.compaction_threshold,
        )
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn contains_transaction(&self, tag: &str) -> bool {
        self.transactions.contains_key(tag)
    }

    /// Register an open transaction; a tag may only be open once
    pub(crate) fn add_transaction(&mut self, tag: &str, core: Weak<TxnCore<S>>) -> Result<()> {
        if self.contains_transaction(tag) {
            return Err(EmberError::AlreadyExists(tag.to_string()));
        }
        self.transactions.insert(tag.to_string(), core);
        Ok(())
    }

    /// Forget `tag`: release its locks and delete its scratch directory
    pub fn remove_transaction(&mut self, tag: &str) {
        self.transactions.remove(tag);
        self.locks.retain(|_, holder| holder != tag);
        self.remove_dir(tag);
    }

    /// Remove `core` only if it is still the transaction registered under its tag
    pub(crate) fn detach(&mut self, core: &TxnCore<S>) {
        let current = self
            .transactions
            .get(core.tag())
            .map_or(false, |weak| std::ptr::eq(weak.as_ptr(), core));
        if current {
            self.remove_transaction(core.tag());
        }
    }

    /// Still-alive handles of every open transaction
    pub(crate) fn open_transactions(&self) -> Vec<Arc<TxnCore<S>>> {
        self.transactions.values().filter_map(Weak::upgrade).collect()
    }

    /// Tags of every open transaction, sorted
    pub fn open_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.transactions.keys().cloned().collect();
        tags.sort();
        tags
    }

    // =========================================================================
    // Lock Table
    // =========================================================================

    pub fn lock_key(&mut self, tag: &str, key: &[u8]) {
        self.locks
            .insert(Bytes::copy_from_slice(key), tag.to_string());
    }

    pub fn unlock_key(&mut self, key: &[u8]) {
        self.locks.remove(key);
    }

    /// Tag currently holding `key`, if any
    pub fn lock_holder(&self, key: &[u8]) -> Option<&str> {
        self.locks.get(key).map(String::as_str)
    }

    pub fn is_locked_by_another_tag(&self, tag: &str, key: &[u8]) -> bool {
        self.lock_holder(key).map_or(false, |holder| holder != tag)
    }

    // =========================================================================
    // Scratch Space
    // =========================================================================

    /// Scratch directory of `tag` (not created)
    pub fn transaction_dir(&self, tag: &str) -> PathBuf {
        self.root.join(tag)
    }

    /// Overlay configuration for `tag`: its scratch directory plus the
    /// coordinator's thresholds
    ///
    /// Overlay compaction keeps tombstones; a pending delete must survive
    /// until commit replays it against the base.
    pub fn overlay_config(&self, tag: &str) -> Result<Config> {
        validate_tag(tag)?;
        Ok(Config::builder()
            .data_dir(self.transaction_dir(tag))
            .memtable_size_limit(self.flush_threshold)
            .compaction_threshold(self.compaction_threshold)
            .keep_tombstones(true)
            .build())
    }

    /// Empty scratch directory for a transaction about to start
    pub(crate) fn prepare_dir(&self, tag: &str) -> Result<PathBuf> {
        let dir = self.transaction_dir(tag);
        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::warn!("Removed stale scratch directory {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Force-abort every open transaction
    ///
    /// Handles still held by callers fail with InvalidState afterwards.
    pub fn close(&mut self) {
        let tags: Vec<String> = self.transactions.keys().cloned().collect();
        for tag in tags {
            if let Some(core) = self.transactions.get(&tag).and_then(Weak::upgrade) {
                // Flag first: dropping `core` here may run its destructor
                core.mark_closed();
            }
            tracing::debug!("Force-closing transaction '{}'", tag);
            self.remove_transaction(&tag);
        }
        self.locks.clear();
    }

    fn remove_dir(&self, tag: &str) {
        let dir = self.transaction_dir(tag);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", dir.display(), e),
        }
    }
}

/// Tags name directories, so they must be a single plain path component
fn validate_tag(tag: &str) -> Result<()> {
    let invalid = tag.is_empty()
        || tag == "."
        || tag == ".."
        || tag.contains(|c: char| c == '/' || c == '\\' || c == '\0');
    if invalid {
        return Err(EmberError::InvalidTag(tag.to_string()));
    }
    Ok(())
}
