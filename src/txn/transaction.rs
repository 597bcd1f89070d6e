//! Transaction
//!
//! A private overlay store layered over a shared base store.
//!
//! ## State Machine
//! ```text
//!            commit() ──► replay overlay into base ─┐
//!   Open ──┤                                          ├──► Closed
//!            abort() / drop / coordinator close ─────┘
//! ```
//! Closing always releases every lock held under the tag and deletes the
//! scratch directory. Every operation on a Closed transaction fails with
//! InvalidState.
//!
//! ## Lock Order
//! overlay → base, overlay → coordinator. The base and the coordinator are
//! never held while acquiring an overlay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::error::{EmberError, Result};
use crate::item::Item;
use crate::iterator::{live, merge_items, ItemIter, RecordIter};
use crate::sequence::SequenceGenerator;
use crate::store::KvStore;

use super::coordinator::Coordinator;

/// Shared state behind a [`Transaction`] handle
pub(crate) struct TxnCore<S> {
    tag: String,
    closed: AtomicBool,
    /// Pending writes; an engine of its own so large transactions can flush
    overlay: Mutex<Engine>,
    base: Arc<Mutex<S>>,
    coordinator: Arc<Mutex<Coordinator<S>>>,
}

impl<S> TxnCore<S> {
    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<S> Drop for TxnCore<S> {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            tracing::warn!("Transaction '{}' dropped while open, aborting", self.tag);
            *self.closed.get_mut() = true;
            let coordinator = Arc::clone(&self.coordinator);
            coordinator.lock().detach(self);
        }
    }
}

/// Handle on an open (or closed) transaction
pub struct Transaction<S> {
    core: Arc<TxnCore<S>>,
}

impl<S: KvStore> Transaction<S> {
    /// Start a transaction named `tag` over `base`
    ///
    /// The overlay lives in the coordinator's scratch directory for `tag` and
    /// stamps writes from `sequence`, which should be the base's own source.
    pub fn begin(
        tag: &str,
        base: Arc<Mutex<S>>,
        coordinator: Arc<Mutex<Coordinator<S>>>,
        sequence: Arc<SequenceGenerator>,
    ) -> Result<Self> {
        let mut registry = coordinator.lock();
        if registry.contains_transaction(tag) {
            return Err(EmberError::AlreadyExists(tag.to_string()));
        }

        let config = registry.overlay_config(tag)?;
        let dir = registry.prepare_dir(tag)?;
        let overlay = match Engine::open_with_sequence(config, sequence) {
            Ok(overlay) => overlay,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        let core = Arc::new(TxnCore {
            tag: tag.to_string(),
            closed: AtomicBool::new(false),
            overlay: Mutex::new(overlay),
            base,
            coordinator: Arc::clone(&coordinator),
        });
        if let Err(e) = registry.add_transaction(tag, Arc::downgrade(&core)) {
            core.mark_closed();
            return Err(e);
        }
        drop(registry);

        tracing::debug!("Began transaction '{}'", tag);
        Ok(Self { core })
    }

    pub(crate) fn from_core(core: Arc<TxnCore<S>>) -> Self {
        Self { core }
    }

    pub fn tag(&self) -> &str {
        &self.core.tag
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Write `value` under `key` in this transaction
    ///
    /// Fails with Conflict if another open transaction already wrote `key`.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut overlay = self.core.overlay.lock();
        self.ensure_open()?;
        self.acquire(key)?;
        overlay.upsert(key, value)
    }

    /// Delete `key` in this transaction
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let mut overlay = self.core.overlay.lock();
        self.ensure_open()?;
        self.acquire(key)?;
        overlay.remove(key)
    }

    /// Read through the overlay: own writes first, then the base
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let overlay = self.core.overlay.lock();
        self.ensure_open()?;

        match overlay.lookup(key)? {
            Some(item) if item.is_removed() => Err(EmberError::NotFound),
            Some(item) => Ok(item.value().clone()),
            None => self.core.base.lock().get(key),
        }
    }

    /// Newest version of `key`, overlay first
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Item>> {
        let overlay = self.core.overlay.lock();
        self.ensure_open()?;

        match overlay.lookup(key)? {
            Some(item) => Ok(Some(item)),
            None => self.core.base.lock().lookup(key),
        }
    }

    /// Overlay merged with the base, newest version per key
    pub fn items(&self, from: &[u8]) -> Result<ItemIter> {
        let overlay = self.core.overlay.lock();
        self.ensure_open()?;

        let base = self.core.base.lock().items(from)?;
        Ok(merge_items(vec![overlay.items(from), base]))
    }

    /// Live (key, value) pairs as this transaction sees them
    pub fn iter(&self, from: &[u8]) -> Result<RecordIter> {
        Ok(live(self.items(from)?))
    }

    /// Replay every pending write into the base, then close
    ///
    /// Replay runs in ascending key order with the base locked throughout.
    /// If the base rejects a write the transaction stays open with its locks
    /// and overlay intact, so the commit can be retried; a retry replays the
    /// whole overlay again.
    pub fn commit(&self) -> Result<()> {
        let overlay = self.core.overlay.lock();
        self.ensure_open()?;

        let pending: Vec<Item> = overlay.items(&[]).collect();
        {
            let mut base = self.core.base.lock();
            for item in &pending {
                let applied = if item.is_removed() {
                    base.remove(item.key())
                } else {
                    base.upsert(item.key(), item.value())
                };
                if let Err(e) = applied {
                    tracing::error!(
                        "Commit of transaction '{}' failed at key {:?}: {}",
                        self.core.tag,
                        item.key(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        self.close_locked();
        drop(overlay);

        tracing::debug!(
            "Committed transaction '{}' ({} writes)",
            self.core.tag,
            pending.len()
        );
        Ok(())
    }

    /// Discard every pending write and close
    pub fn abort(&self) -> Result<()> {
        let overlay = self.core.overlay.lock();
        self.ensure_open()?;

        self.close_locked();
        drop(overlay);

        tracing::debug!("Aborted transaction '{}'", self.core.tag);
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.core.is_closed() {
            return Err(EmberError::InvalidState(format!(
                "transaction '{}' is already closed",
                self.core.tag
            )));
        }
        Ok(())
    }

    /// Take the lock on `key` for this tag, failing fast on conflict
    fn acquire(&self, key: &[u8]) -> Result<()> {
        let mut coordinator = self.core.coordinator.lock();
        if coordinator.is_locked_by_another_tag(&self.core.tag, key) {
            let holder = coordinator.lock_holder(key).unwrap_or_default().to_string();
            return Err(EmberError::Conflict {
                key: key.to_vec(),
                tag: holder,
            });
        }
        coordinator.lock_key(&self.core.tag, key);
        Ok(())
    }

    /// Mark closed, release locks and scratch space (overlay lock held)
    fn close_locked(&self) {
        self.core.mark_closed();
        self.core.coordinator.lock().detach(&self.core);
    }
}

impl<S: KvStore> KvStore for Transaction<S> {
    fn get(&self, key: &[u8]) -> Result<Bytes> {
        Transaction::get(self, key)
    }

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Transaction::upsert(self, key, value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        Transaction::remove(self, key)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Item>> {
        Transaction::lookup(self, key)
    }

    fn items(&self, from: &[u8]) -> Result<ItemIter> {
        Transaction::items(self, from)
    }
}
