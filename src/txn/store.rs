//! Transactional Store
//!
//! Facade owning the base engine and the coordinator.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{EmberError, Result};
use crate::sequence::SequenceGenerator;

use super::{Coordinator, Transaction};

/// An engine plus transaction coordination
pub struct TransactionalStore {
    config: Config,

    /// Base engine, shared with every transaction
    engine: Arc<Mutex<Engine>>,

    coordinator: Arc<Mutex<Coordinator<Engine>>>,

    /// Shared by the base engine and every overlay
    sequence: Arc<SequenceGenerator>,
}

impl TransactionalStore {
    /// Open the base engine in `config.data_dir`
    ///
    /// Scratch directories left behind by a previous process are removed:
    /// their transactions can no longer commit.
    pub fn open(config: Config) -> Result<Self> {
        let sequence = Arc::new(SequenceGenerator::new());
        let engine = Engine::open_with_sequence(config.clone(), Arc::clone(&sequence))?;

        let scratch = config.transactions_dir();
        if reset_scratch_dir(&scratch)? {
            tracing::warn!("Discarded stale transactions in {}", scratch.display());
        }

        Ok(Self {
            coordinator: Arc::new(Mutex::new(Coordinator::from_config(&config))),
            engine: Arc::new(Mutex::new(engine)),
            sequence,
            config,
        })
    }

    /// Start a transaction; fails with AlreadyExists if `tag` is open
    pub fn begin_transaction(&self, tag: &str) -> Result<Transaction<Engine>> {
        Transaction::begin(
            tag,
            Arc::clone(&self.engine),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.sequence),
        )
    }

    /// The base engine
    ///
    /// Do not hold its lock while calling into a transaction.
    pub fn storage(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    /// Tags of every open transaction
    pub fn open_tags(&self) -> Vec<String> {
        self.coordinator.lock().open_tags()
    }

    /// Commit every open transaction
    ///
    /// Keeps going past failures and returns the first error.
    pub fn commit_all(&self) -> Result<()> {
        self.for_each_open(|txn| txn.commit())
    }

    /// Abort every open transaction
    pub fn abort_all(&self) -> Result<()> {
        self.for_each_open(|txn| txn.abort())
    }

    /// Abort whatever is still open and flush the base engine
    pub fn close(&self) -> Result<()> {
        self.coordinator.lock().close();
        self.engine.lock().close()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn for_each_open<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(&Transaction<Engine>) -> Result<()>,
    {
        // Snapshot first: closing a transaction locks the coordinator
        let open = self.coordinator.lock().open_transactions();

        let mut first_error = None;
        for core in open {
            let txn = Transaction::from_core(core);
            match op(&txn) {
                Ok(()) => {}
                // Closed by someone else since the snapshot
                Err(EmberError::InvalidState(_)) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Leave `dir` existing and empty; true if it held anything before
fn reset_scratch_dir(dir: &Path) -> Result<bool> {
    let stale = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    if stale {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(stale)
}
