//! Tests for transactions
//!
//! These tests verify:
//! - Overlay reads and writes before commit
//! - Commit replay and abort
//! - Fail-fast per-key conflicts between open transactions
//! - Every operation on a closed transaction is rejected
//! - Bulk commit/abort and force-close on shutdown
//! - Scratch directory lifecycle

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use emberkv::item::Item;
use emberkv::iterator::ItemIter;
use emberkv::{
    Config, Coordinator, EmberError, KvStore, MemTable, SequenceGenerator, Transaction,
    TransactionalStore,
};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, TransactionalStore) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(1024 * 1024) // 1 MB
        .build();
    let store = TransactionalStore::open(config).unwrap();
    (temp_dir, store)
}

fn base_get(store: &TransactionalStore, key: &[u8]) -> emberkv::Result<Bytes> {
    store.storage().lock().get(key)
}

fn assert_invalid_state<T: std::fmt::Debug>(result: emberkv::Result<T>) {
    match result {
        Err(EmberError::InvalidState(_)) => {}
        other => panic!("expected InvalidState, got {:?}", other),
    }
}

fn assert_conflict<T: std::fmt::Debug>(result: emberkv::Result<T>, key: &[u8], holder: &str) {
    match result {
        Err(EmberError::Conflict { key: locked, tag }) => {
            assert_eq!(locked, key);
            assert_eq!(tag, holder);
        }
        other => panic!("expected Conflict, got {:?}", other),
    }
}

/// Base store whose writes can be made to fail on demand
struct FlakyStore {
    inner: MemTable,
    fail_writes: bool,
}

impl KvStore for FlakyStore {
    fn get(&self, key: &[u8]) -> emberkv::Result<Bytes> {
        self.inner.get(key)
    }

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> emberkv::Result<()> {
        if self.fail_writes {
            return Err(EmberError::Storage("disk full".to_string()));
        }
        self.inner.upsert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> emberkv::Result<()> {
        if self.fail_writes {
            return Err(EmberError::Storage("disk full".to_string()));
        }
        self.inner.remove(key);
        Ok(())
    }

    fn lookup(&self, key: &[u8]) -> emberkv::Result<Option<Item>> {
        Ok(self.inner.get_item(key).cloned())
    }

    fn items(&self, from: &[u8]) -> emberkv::Result<ItemIter> {
        Ok(Box::new(self.inner.iter_from(from)))
    }
}

// =============================================================================
// Basic Commit / Abort Tests
// =============================================================================

#[test]
fn test_commit_publishes_and_remove_commit_hides() {
    let (_temp, store) = setup_temp_store();

    let txn = store.begin_transaction("insert").unwrap();
    for (key, value) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
        txn.upsert(key, value).unwrap();
    }

    assert!(base_get(&store, b"a").unwrap_err().is_not_found());
    assert_eq!(&txn.get(b"a").unwrap()[..], b"1");

    txn.commit().unwrap();
    assert_eq!(&base_get(&store, b"a").unwrap()[..], b"1");
    assert_eq!(&base_get(&store, b"b").unwrap()[..], b"2");
    assert_eq!(&base_get(&store, b"c").unwrap()[..], b"3");

    let txn = store.begin_transaction("delete").unwrap();
    txn.remove(b"a").unwrap();
    txn.commit().unwrap();

    assert!(base_get(&store, b"a").unwrap_err().is_not_found());
    assert_eq!(&base_get(&store, b"b").unwrap()[..], b"2");
}

#[test]
fn test_abort_discards_writes() {
    let (_temp, store) = setup_temp_store();
    store.storage().lock().upsert(b"k", b"base").unwrap();

    let txn = store.begin_transaction("t").unwrap();
    txn.upsert(b"k", b"pending").unwrap();
    txn.upsert(b"new", b"pending").unwrap();
    txn.abort().unwrap();

    assert_eq!(&base_get(&store, b"k").unwrap()[..], b"base");
    assert!(base_get(&store, b"new").unwrap_err().is_not_found());
    assert!(txn.is_closed());
}

#[test]
fn test_get_falls_back_to_base() {
    let (_temp, store) = setup_temp_store();
    store.storage().lock().upsert(b"shared", b"base").unwrap();

    let txn = store.begin_transaction("reader").unwrap();

    assert_eq!(&txn.get(b"shared").unwrap()[..], b"base");
    assert!(txn.get(b"missing").unwrap_err().is_not_found());
    txn.abort().unwrap();
}

#[test]
fn test_overlay_tombstone_hides_base_value() {
    let (_temp, store) = setup_temp_store();
    store.storage().lock().upsert(b"k", b"base").unwrap();

    let txn = store.begin_transaction("t").unwrap();
    txn.remove(b"k").unwrap();

    assert!(txn.get(b"k").unwrap_err().is_not_found());
    assert!(txn.lookup(b"k").unwrap().unwrap().is_removed());
    assert_eq!(&base_get(&store, b"k").unwrap()[..], b"base");
    txn.abort().unwrap();
}

#[test]
fn test_transaction_iterator_merges_overlay_and_base() {
    let (_temp, store) = setup_temp_store();
    {
        let storage = store.storage();
        let mut engine = storage.lock();
        engine.upsert(b"a", b"1").unwrap();
        engine.upsert(b"b", b"2").unwrap();
        engine.flush().unwrap();
        engine.upsert(b"d", b"4").unwrap();
    }

    let txn = store.begin_transaction("t").unwrap();
    txn.remove(b"a").unwrap();
    txn.upsert(b"b", b"20").unwrap();
    txn.upsert(b"c", b"30").unwrap();

    let visible: Vec<(Bytes, Bytes)> = txn.iter(b"").unwrap().collect();
    assert_eq!(
        visible,
        vec![
            (Bytes::from("b"), Bytes::from("20")),
            (Bytes::from("c"), Bytes::from("30")),
            (Bytes::from("d"), Bytes::from("4")),
        ]
    );

    let from_c: Vec<Bytes> = txn.iter(b"c").unwrap().map(|(key, _)| key).collect();
    assert_eq!(from_c, vec![Bytes::from("c"), Bytes::from("d")]);

    // Base is untouched until commit
    let base: Vec<(Bytes, Bytes)> = store.storage().lock().iter(b"").collect();
    assert_eq!(base.len(), 3);
    txn.abort().unwrap();
}

#[test]
fn test_large_transaction_flushes_overlay() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(512)
        .compaction_threshold(10_000)
        .build();
    let store = TransactionalStore::open(config).unwrap();

    let txn = store.begin_transaction("bulk").unwrap();
    for i in 0..200 {
        let key = format!("key{:04}", i);
        txn.upsert(key.as_bytes(), b"value").unwrap();
    }

    let scratch = store.config().transactions_dir().join("bulk");
    let overlay_tables = std::fs::read_dir(&scratch).unwrap().count();
    assert!(overlay_tables > 1);
    assert_eq!(txn.iter(b"").unwrap().count(), 200);

    txn.commit().unwrap();

    assert!(!scratch.exists());
    assert_eq!(store.storage().lock().iter(b"").count(), 200);
}

#[test]
fn test_pending_remove_survives_overlay_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(64)
        .compaction_threshold(1)
        .build();
    let store = TransactionalStore::open(config).unwrap();
    store.storage().lock().upsert(b"a", b"base").unwrap();

    let txn = store.begin_transaction("t").unwrap();
    txn.remove(b"a").unwrap();
    for i in 0..20 {
        txn.upsert(format!("k{:02}", i).as_bytes(), b"v").unwrap();
    }

    // Enough flushes that the overlay has compacted at least once
    let scratch = store.config().transactions_dir().join("t");
    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 1);

    assert!(txn.get(b"a").unwrap_err().is_not_found());
    assert!(txn.lookup(b"a").unwrap().unwrap().is_removed());
    assert!(txn.iter(b"").unwrap().all(|(key, _)| &key[..] != b"a"));

    txn.commit().unwrap();

    assert!(base_get(&store, b"a").unwrap_err().is_not_found());
    assert_eq!(store.storage().lock().iter(b"").count(), 20);
}

// =============================================================================
// Lock Exclusivity Tests
// =============================================================================

#[test]
fn test_conflicting_write_fails_fast() {
    let (_temp, store) = setup_temp_store();

    let a = store.begin_transaction("A").unwrap();
    let b = store.begin_transaction("B").unwrap();

    a.upsert(b"K", b"from-a").unwrap();

    assert_conflict(b.upsert(b"K", b"from-b"), b"K", "A");
    assert_conflict(b.remove(b"K"), b"K", "A");

    // Readers are never blocked, and never see uncommitted data
    assert!(b.get(b"K").unwrap_err().is_not_found());

    a.commit().unwrap();

    b.upsert(b"K", b"from-b").unwrap();
    b.commit().unwrap();
    assert_eq!(&base_get(&store, b"K").unwrap()[..], b"from-b");
}

#[test]
fn test_abort_releases_locks() {
    let (_temp, store) = setup_temp_store();

    let a = store.begin_transaction("A").unwrap();
    let b = store.begin_transaction("B").unwrap();

    a.remove(b"K").unwrap();
    assert!(b.upsert(b"K", b"v").unwrap_err().is_conflict());

    a.abort().unwrap();
    b.upsert(b"K", b"v").unwrap();
    b.commit().unwrap();
}

#[test]
fn test_same_transaction_rewrites_own_key() {
    let (_temp, store) = setup_temp_store();

    let txn = store.begin_transaction("t").unwrap();
    txn.upsert(b"k", b"1").unwrap();
    txn.upsert(b"k", b"2").unwrap();
    txn.remove(b"k").unwrap();
    txn.upsert(b"k", b"3").unwrap();
    txn.commit().unwrap();

    assert_eq!(&base_get(&store, b"k").unwrap()[..], b"3");
}

#[test]
fn test_disjoint_transactions_on_threads() {
    let (_temp, store) = setup_temp_store();

    thread::scope(|scope| {
        for worker in 0..4 {
            let store = &store;
            scope.spawn(move || {
                let txn = store.begin_transaction(&format!("worker{}", worker)).unwrap();
                for i in 0..50 {
                    let key = format!("w{}-{:03}", worker, i);
                    txn.upsert(key.as_bytes(), b"v").unwrap();
                }
                txn.commit().unwrap();
            });
        }
    });

    assert_eq!(store.storage().lock().iter(b"").count(), 200);
    assert!(store.open_tags().is_empty());
}

// =============================================================================
// Closed Transaction Tests
// =============================================================================

#[test]
fn test_every_operation_fails_after_commit() {
    let (_temp, store) = setup_temp_store();

    let txn = store.begin_transaction("t").unwrap();
    txn.upsert(b"k", b"v").unwrap();
    txn.commit().unwrap();

    assert!(txn.is_closed());
    assert_invalid_state(txn.upsert(b"k", b"v"));
    assert_invalid_state(txn.remove(b"k"));
    assert_invalid_state(txn.get(b"k"));
    assert_invalid_state(txn.lookup(b"k"));
    assert!(matches!(txn.items(b""), Err(EmberError::InvalidState(_))));
    assert!(matches!(txn.iter(b""), Err(EmberError::InvalidState(_))));
    assert_invalid_state(txn.commit());
    assert_invalid_state(txn.abort());
}

#[test]
fn test_every_operation_fails_after_abort() {
    let (_temp, store) = setup_temp_store();

    let txn = store.begin_transaction("t").unwrap();
    txn.abort().unwrap();

    assert_invalid_state(txn.upsert(b"k", b"v"));
    assert_invalid_state(txn.remove(b"k"));
    assert_invalid_state(txn.get(b"k"));
    assert_invalid_state(txn.abort());
    assert_invalid_state(txn.commit());
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_duplicate_tag_rejected() {
    let (_temp, store) = setup_temp_store();

    let first = store.begin_transaction("dup").unwrap();
    match store.begin_transaction("dup") {
        Err(EmberError::AlreadyExists(tag)) => assert_eq!(tag, "dup"),
        Err(other) => panic!("expected AlreadyExists, got {:?}", other),
        Ok(_) => panic!("expected AlreadyExists"),
    }

    // The tag is free again once the first one closes
    first.commit().unwrap();
    let second = store.begin_transaction("dup").unwrap();
    second.abort().unwrap();
}

#[test]
fn test_invalid_tags_rejected() {
    let (_temp, store) = setup_temp_store();

    for tag in ["", ".", "..", "a/b", "a\\b"] {
        assert!(
            matches!(store.begin_transaction(tag), Err(EmberError::InvalidTag(_))),
            "tag {:?} should be rejected",
            tag
        );
    }
    assert!(store.open_tags().is_empty());
}

#[test]
fn test_open_tags_tracks_lifecycle() {
    let (_temp, store) = setup_temp_store();

    let b = store.begin_transaction("b").unwrap();
    let a = store.begin_transaction("a").unwrap();
    assert_eq!(store.open_tags(), vec!["a".to_string(), "b".to_string()]);

    a.commit().unwrap();
    assert_eq!(store.open_tags(), vec!["b".to_string()]);

    b.abort().unwrap();
    assert!(store.open_tags().is_empty());
}

#[test]
fn test_scratch_directory_lifecycle() {
    let (_temp, store) = setup_temp_store();
    let scratch = store.config().transactions_dir().join("t");

    let txn = store.begin_transaction("t").unwrap();
    assert!(scratch.is_dir());

    txn.abort().unwrap();
    assert!(!scratch.exists());
}

#[test]
fn test_drop_aborts_open_transaction() {
    let (_temp, store) = setup_temp_store();
    let scratch = store.config().transactions_dir().join("dropped");

    {
        let txn = store.begin_transaction("dropped").unwrap();
        txn.upsert(b"K", b"never").unwrap();
    }

    assert!(store.open_tags().is_empty());
    assert!(!scratch.exists());
    assert!(base_get(&store, b"K").unwrap_err().is_not_found());

    // Its lock went with it
    let other = store.begin_transaction("other").unwrap();
    other.upsert(b"K", b"v").unwrap();
    other.commit().unwrap();
}

// =============================================================================
// Bulk Shutdown Tests
// =============================================================================

#[test]
fn test_commit_all() {
    let (_temp, store) = setup_temp_store();

    let a = store.begin_transaction("a").unwrap();
    let b = store.begin_transaction("b").unwrap();
    a.upsert(b"ka", b"1").unwrap();
    b.upsert(b"kb", b"2").unwrap();

    store.commit_all().unwrap();

    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(store.open_tags().is_empty());
    assert_eq!(&base_get(&store, b"ka").unwrap()[..], b"1");
    assert_eq!(&base_get(&store, b"kb").unwrap()[..], b"2");
}

#[test]
fn test_abort_all() {
    let (_temp, store) = setup_temp_store();

    let a = store.begin_transaction("a").unwrap();
    let b = store.begin_transaction("b").unwrap();
    a.upsert(b"ka", b"1").unwrap();
    b.upsert(b"kb", b"2").unwrap();

    store.abort_all().unwrap();

    assert_invalid_state(a.get(b"ka"));
    assert_invalid_state(b.get(b"kb"));
    assert!(base_get(&store, b"ka").unwrap_err().is_not_found());
    assert!(base_get(&store, b"kb").unwrap_err().is_not_found());
}

#[test]
fn test_close_force_aborts_open_transactions() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let store = TransactionalStore::open(config.clone()).unwrap();

    store.storage().lock().upsert(b"committed", b"yes").unwrap();
    let txn = store.begin_transaction("pending").unwrap();
    txn.upsert(b"uncommitted", b"no").unwrap();

    store.close().unwrap();

    assert!(txn.is_closed());
    assert_invalid_state(txn.upsert(b"x", b"y"));
    assert!(!config.transactions_dir().join("pending").exists());
    drop(txn);
    drop(store);

    let reopened = TransactionalStore::open(config).unwrap();
    assert_eq!(&base_get(&reopened, b"committed").unwrap()[..], b"yes");
    assert!(base_get(&reopened, b"uncommitted").unwrap_err().is_not_found());
}

#[test]
fn test_open_purges_stale_scratch_directories() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let stale = config.transactions_dir().join("crashed");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("leftover.sst"), b"junk").unwrap();

    let store = TransactionalStore::open(config).unwrap();

    assert!(!stale.exists());
    assert!(store.config().transactions_dir().is_dir());
    assert_eq!(store.storage().lock().sstable_count(), 0);
}

// =============================================================================
// Generic Base Store Tests
// =============================================================================

#[test]
fn test_transaction_over_memtable_base() {
    let temp_dir = TempDir::new().unwrap();
    let sequence = Arc::new(SequenceGenerator::new());
    let base = Arc::new(Mutex::new(MemTable::with_sequence(1024, Arc::clone(&sequence))));
    let coordinator = Arc::new(Mutex::new(Coordinator::new(temp_dir.path(), 1024, 8)));

    base.lock().upsert(b"a", b"base");

    let txn = Transaction::begin("t", Arc::clone(&base), Arc::clone(&coordinator), sequence)
        .unwrap();
    txn.upsert(b"a", b"txn").unwrap();
    txn.upsert(b"b", b"txn").unwrap();

    assert_eq!(coordinator.lock().lock_holder(b"a"), Some("t"));
    assert_eq!(&base.lock().get(b"a").unwrap()[..], b"base");

    txn.commit().unwrap();

    assert_eq!(&base.lock().get(b"a").unwrap()[..], b"txn");
    assert_eq!(&base.lock().get(b"b").unwrap()[..], b"txn");
    assert!(coordinator.lock().lock_holder(b"a").is_none());
    assert!(!coordinator.lock().contains_transaction("t"));
}

#[test]
fn test_failed_commit_keeps_transaction_open() {
    let temp_dir = TempDir::new().unwrap();
    let sequence = Arc::new(SequenceGenerator::new());
    let base = Arc::new(Mutex::new(FlakyStore {
        inner: MemTable::with_sequence(1024, Arc::clone(&sequence)),
        fail_writes: true,
    }));
    let coordinator = Arc::new(Mutex::new(Coordinator::new(temp_dir.path(), 1024, 8)));

    let txn = Transaction::begin("t", Arc::clone(&base), Arc::clone(&coordinator), sequence)
        .unwrap();
    txn.upsert(b"k", b"v").unwrap();

    assert!(txn.commit().is_err());

    // Still open, still holding its lock and its pending write
    assert!(!txn.is_closed());
    assert_eq!(coordinator.lock().lock_holder(b"k"), Some("t"));
    assert_eq!(&txn.get(b"k").unwrap()[..], b"v");
    assert!(temp_dir.path().join("t").is_dir());

    base.lock().fail_writes = false;
    txn.commit().unwrap();

    assert!(txn.is_closed());
    assert_eq!(&base.lock().inner.get(b"k").unwrap()[..], b"v");
    assert!(coordinator.lock().lock_holder(b"k").is_none());
    assert!(!temp_dir.path().join("t").exists());
}

#[test]
fn test_coordinator_lock_table() {
    let temp_dir = TempDir::new().unwrap();
    let mut coordinator: Coordinator<MemTable> = Coordinator::new(temp_dir.path(), 1024, 8);

    assert!(!coordinator.is_locked_by_another_tag("a", b"k"));

    coordinator.lock_key("a", b"k");
    assert!(!coordinator.is_locked_by_another_tag("a", b"k"));
    assert!(coordinator.is_locked_by_another_tag("b", b"k"));

    coordinator.unlock_key(b"k");
    assert!(!coordinator.is_locked_by_another_tag("b", b"k"));

    coordinator.lock_key("a", b"x");
    coordinator.lock_key("a", b"y");
    coordinator.lock_key("b", b"z");
    coordinator.remove_transaction("a");
    assert!(coordinator.lock_holder(b"x").is_none());
    assert!(coordinator.lock_holder(b"y").is_none());
    assert_eq!(coordinator.lock_holder(b"z"), Some("b"));
}
