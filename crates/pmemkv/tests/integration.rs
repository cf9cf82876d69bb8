//! Integration tests: the `Db` façade over every registered engine.
//!
//! These tests exercise the full open -> put/get/iterate -> transaction ->
//! close -> reopen pipeline against real pool directories.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use pmemkv::{Config, Db, FnComparator, KvError, PoolObjectId, Status, TxState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PERSISTENT_ENGINES: [&str; 3] = ["cmap", "csmap", "radix"];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_config(dir: &TempDir, size: u64) -> Config {
    let mut cfg = Config::new();
    cfg.put_path(dir.path().to_str().unwrap()).put_size(size).put_create_if_missing(true);
    cfg
}

fn reopen_config(dir: &TempDir) -> Config {
    let mut cfg = Config::new();
    cfg.put_path(dir.path().to_str().unwrap());
    cfg
}

fn collect_keys(db: &Db) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    db.get_all(|k, _| {
        keys.push(k.to_vec());
        0
    })
    .unwrap();
    keys
}

// ---------------------------------------------------------------------------
// Basic scenario, every engine
// ---------------------------------------------------------------------------

#[test]
fn test_basic_scenario_all_engines() {
    init_logging();
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();

        db.put(b"key1", b"value1").unwrap();
        assert_eq!(db.count_all().unwrap(), 1, "{}", engine);
        assert_eq!(db.get(b"key1").unwrap(), b"value1", "{}", engine);

        db.put(b"key2", b"value2").unwrap();
        db.put(b"key3", b"value3").unwrap();

        let mut keys = collect_keys(&db);
        keys.sort();
        assert_eq!(keys, vec![b"key1".to_vec(), b"key2".to_vec(), b"key3".to_vec()], "{}", engine);

        db.defrag(0, 100).unwrap();

        db.remove(b"key1").unwrap();
        assert_eq!(db.exists(b"key1"), Status::NotFound, "{}", engine);
        assert_eq!(db.remove(b"key1").unwrap_err().status(), Status::NotFound, "{}", engine);
        assert_eq!(db.get(b"key2").unwrap(), b"value2", "{}", engine);
    }
}

#[test]
fn test_overwrite_keeps_count() {
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();
        db.put(b"k", b"first").unwrap();
        db.put(b"k", b"second, longer value").unwrap();
        assert_eq!(db.count_all().unwrap(), 1, "{}", engine);
        assert_eq!(db.get(b"k").unwrap(), b"second, longer value", "{}", engine);
    }
}

#[test]
fn test_iterate_stops_with_callback_code() {
    let dir = TempDir::new().unwrap();
    let db = Db::open("csmap", create_config(&dir, 1 << 20)).unwrap();
    for i in 0..10u8 {
        db.put(&[i], b"v").unwrap();
    }

    let mut visited = 0;
    let err = db
        .get_all(|_, _| {
            visited += 1;
            if visited == 3 {
                42
            } else {
                0
            }
        })
        .unwrap_err();
    assert!(matches!(err, KvError::StoppedByCallback { code: 42 }));
    assert_eq!(err.status(), Status::StoppedByCallback);
    assert_eq!(visited, 3);
}

#[test]
fn test_prefix_count_and_iterate() {
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();
        for key in [&b"user:1"[..], b"user:2", b"user:10", b"order:1", b"use"] {
            db.put(key, b"x").unwrap();
        }
        assert_eq!(db.count(Some(&b"user:"[..])).unwrap(), 3, "{}", engine);
        assert_eq!(db.count(None).unwrap(), 5, "{}", engine);

        let mut seen = Vec::new();
        db.iterate(Some(&b"order"[..]), |k, _| {
            seen.push(k.to_vec());
            0
        })
        .unwrap();
        assert_eq!(seen, vec![b"order:1".to_vec()], "{}", engine);
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn test_ordered_engines_iterate_ascending() {
    let keys: Vec<Vec<u8>> = (0..200u32).map(|i| (i * 7919 % 1000).to_string().into_bytes()).collect();
    for engine in ["csmap", "radix"] {
        let dir = TempDir::new().unwrap();
        let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();
        for key in &keys {
            db.put(key, b"v").unwrap();
        }
        let seen = collect_keys(&db);
        let mut expected = keys.clone();
        expected.sort();
        expected.dedup();
        assert_eq!(seen, expected, "{}", engine);
    }
}

#[test]
fn test_custom_comparator_order_and_mismatch() {
    init_logging();
    let dir = TempDir::new().unwrap();
    {
        let mut cfg = create_config(&dir, 1 << 20);
        cfg.put_comparator(Arc::new(FnComparator::new("reverse", |a: &[u8], b: &[u8]| b.cmp(a))));
        let db = Db::open("csmap", cfg).unwrap();
        for key in [&b"a"[..], b"c", b"b"] {
            db.put(key, b"v").unwrap();
        }
        assert_eq!(collect_keys(&db), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(db.count_above(b"b").unwrap(), 1, "above in comparator order is 'a'");
    }

    let mut cfg = reopen_config(&dir);
    cfg.put_comparator(Arc::new(FnComparator::new("forward", |a: &[u8], b: &[u8]| a.cmp(b))));
    let err = Db::open("csmap", cfg).unwrap_err();
    assert_eq!(err.status(), Status::ComparatorMismatch);

    // Without a comparator the binary one is implied, which also mismatches.
    let err = Db::open("csmap", reopen_config(&dir)).unwrap_err();
    assert_eq!(err.status(), Status::ComparatorMismatch);
}

#[test]
fn test_radix_comparator_mismatch_on_reopen() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let reverse = || Arc::new(FnComparator::new("reverse", |a: &[u8], b: &[u8]| b.cmp(a)));

    // Creating a radix pool with a custom order is refused outright.
    let mut cfg = create_config(&dir, 1 << 20);
    cfg.put_comparator(reverse());
    assert_eq!(Db::open("radix", cfg).unwrap_err().status(), Status::InvalidArgument);

    {
        let db = Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
        db.put(b"k", b"v").unwrap();
    }

    let mut cfg = reopen_config(&dir);
    cfg.put_comparator(reverse());
    let err = Db::open("radix", cfg).unwrap_err();
    assert_eq!(err.status(), Status::ComparatorMismatch);

    let db = Db::open("radix", reopen_config(&dir)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"v");
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn test_transaction_scenario() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let db = Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
    db.put(b"key1", b"value1").unwrap();

    let mut tx = db.tx_begin().unwrap();
    tx.remove(b"key1").unwrap();
    tx.put(b"key2", b"value2").unwrap();
    tx.put(b"key3", b"value3").unwrap();

    assert_eq!(db.exists(b"key1"), Status::Ok);
    assert_eq!(db.exists(b"key2"), Status::NotFound);
    assert_eq!(db.exists(b"key3"), Status::NotFound);

    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);

    assert_eq!(db.exists(b"key1"), Status::NotFound);
    assert_eq!(db.exists(b"key2"), Status::Ok);
    assert_eq!(db.exists(b"key3"), Status::Ok);
}

#[test]
fn test_transaction_dropped_without_commit() {
    let dir = TempDir::new().unwrap();
    let db = Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
    db.put(b"key1", b"value1").unwrap();

    {
        let mut tx = db.tx_begin().unwrap();
        tx.put(b"key2", b"value2").unwrap();
        tx.remove(b"key1").unwrap();
    }

    assert_eq!(db.count_all().unwrap(), 1);
    assert_eq!(db.get(b"key1").unwrap(), b"value1");
    assert_eq!(db.exists(b"key2"), Status::NotFound);

    // The slot is free again.
    let mut tx = db.tx_begin().unwrap();
    tx.put(b"key2", b"value2").unwrap();
    tx.commit().unwrap();
    assert_eq!(db.count_all().unwrap(), 2);
}

#[test]
fn test_second_transaction_rejected_while_staging() {
    let dir = TempDir::new().unwrap();
    let db = Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
    let mut first = db.tx_begin().unwrap();
    first.put(b"a", b"1").unwrap();

    let err = db.tx_begin().unwrap_err();
    assert_eq!(err.status(), Status::TransactionScopeError);

    first.commit().unwrap();
    assert!(db.tx_begin().is_ok());
}

#[test]
fn test_failed_commit_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let db = Db::open("radix", create_config(&dir, 8192)).unwrap();
    db.put(b"keep", b"me").unwrap();

    let big = vec![1u8; 3000];
    let mut tx = db.tx_begin().unwrap();
    tx.remove(b"keep").unwrap();
    for key in [&b"a"[..], b"b", b"c"] {
        tx.put(key, &big).unwrap();
    }
    let err = tx.commit().unwrap_err();
    assert_eq!(err.status(), Status::OutOfMemory);
    assert_eq!(tx.state(), TxState::Discarded);
    drop(tx);

    assert_eq!(collect_keys(&db), vec![b"keep".to_vec()]);
    drop(db);

    let db = Db::open("radix", reopen_config(&dir)).unwrap();
    assert_eq!(collect_keys(&db), vec![b"keep".to_vec()]);
}

#[test]
fn test_committed_transaction_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
        db.put(b"key1", b"value1").unwrap();
        let mut tx = db.tx_begin().unwrap();
        tx.remove(b"key1").unwrap();
        tx.put(b"key2", b"value2").unwrap();
        tx.commit().unwrap();
        drop(tx);
        db.close();
    }

    let db = Db::open("radix", reopen_config(&dir)).unwrap();
    assert_eq!(collect_keys(&db), vec![b"key2".to_vec()]);
}

// ---------------------------------------------------------------------------
// Persistence and capacity
// ---------------------------------------------------------------------------

#[test]
fn test_data_survives_reopen() {
    init_logging();
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();
            for i in 0..100u32 {
                db.put(&i.to_be_bytes(), format!("value-{}", i).as_bytes()).unwrap();
            }
            for i in (0..100u32).filter(|i| i % 4 == 0) {
                db.remove(&i.to_be_bytes()).unwrap();
            }
            db.defrag(0, 100).unwrap();
            db.put(&7u32.to_be_bytes(), b"after defrag").unwrap();
        }

        let db = Db::open(engine, reopen_config(&dir)).unwrap();
        assert_eq!(db.count_all().unwrap(), 75, "{}", engine);
        assert_eq!(db.get(&7u32.to_be_bytes()).unwrap(), b"after defrag", "{}", engine);
        assert_eq!(db.get(&9u32.to_be_bytes()).unwrap(), b"value-9", "{}", engine);
        assert_eq!(db.exists(&8u32.to_be_bytes()), Status::NotFound, "{}", engine);
    }
}

#[test]
fn test_writes_after_defrag_survive_undeletable_segment() {
    init_logging();
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(engine, create_config(&dir, 1 << 20)).unwrap();
            db.put(b"a", b"1").unwrap();
            db.defrag(0, 100).unwrap();
            db.put(b"b", b"1").unwrap();

            let blocked = dir.path().join("log").join("wal-0000000000000001.pmkv");
            std::fs::remove_file(&blocked).unwrap();
            std::fs::create_dir(&blocked).unwrap();
            std::fs::write(blocked.join("pinned"), b"x").unwrap();

            db.defrag(0, 100).unwrap();
            db.remove(b"b").unwrap();
            db.put(b"a", b"2").unwrap();
        }

        let db = Db::open(engine, reopen_config(&dir)).unwrap();
        assert_eq!(db.get(b"a").unwrap(), b"2", "{}", engine);
        assert_eq!(db.exists(b"b"), Status::NotFound, "{}", engine);
        assert_eq!(db.count_all().unwrap(), 1, "{}", engine);
    }
}

#[test]
fn test_out_of_memory_then_recover() {
    for engine in PERSISTENT_ENGINES {
        let dir = TempDir::new().unwrap();
        let db = Db::open(engine, create_config(&dir, 16 * 1024)).unwrap();
        let value = vec![3u8; 1024];

        let mut stored = Vec::new();
        let err = loop {
            let key = format!("k{:04}", stored.len()).into_bytes();
            match db.put(&key, &value) {
                Ok(()) => stored.push(key),
                Err(e) => break e,
            }
        };
        assert_eq!(err.status(), Status::OutOfMemory, "{}", engine);
        assert!(!stored.is_empty());
        assert_eq!(db.count_all().unwrap(), stored.len(), "{}", engine);

        let victim = stored.remove(0);
        db.remove(&victim).unwrap();
        db.put(b"k9999", &value).unwrap();
        assert_eq!(db.get(b"k9999").unwrap(), value, "{}", engine);
        assert_eq!(db.count_all().unwrap(), stored.len() + 1, "{}", engine);
    }
}

#[test]
fn test_pool_grows_on_reopen() {
    let dir = TempDir::new().unwrap();
    let value = vec![0u8; 1024];
    {
        let db = Db::open("cmap", create_config(&dir, 8 * 1024)).unwrap();
        let mut i = 0u32;
        while db.put(&i.to_le_bytes(), &value).is_ok() {
            i += 1;
        }
    }

    let mut cfg = reopen_config(&dir);
    cfg.put_size(64 * 1024);
    let db = Db::open("cmap", cfg).unwrap();
    db.put(b"more room", &value).unwrap();
}

// ---------------------------------------------------------------------------
// Open rules and configuration errors
// ---------------------------------------------------------------------------

#[test]
fn test_second_open_fails_while_first_is_open() {
    let dir = TempDir::new().unwrap();
    let db = Db::open("cmap", create_config(&dir, 1 << 20)).unwrap();
    let err = Db::open("cmap", reopen_config(&dir)).unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);

    db.close();
    Db::open("cmap", reopen_config(&dir)).unwrap();
}

#[test]
fn test_engine_mismatch_on_reopen() {
    let dir = TempDir::new().unwrap();
    Db::open("radix", create_config(&dir, 1 << 20)).unwrap();
    let err = Db::open("cmap", reopen_config(&dir)).unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn test_create_modes() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool");

    let mut cfg = Config::new();
    cfg.put_path(pool.to_str().unwrap());
    assert_eq!(Db::open("cmap", cfg).unwrap_err().status(), Status::InvalidArgument);
    assert!(!pool.join("pool.meta").exists());

    let mut cfg = Config::new();
    cfg.put_path(pool.to_str().unwrap()).put_size(1 << 20).put_create_or_error_if_exists(true);
    Db::open("cmap", cfg).unwrap();

    let mut cfg = Config::new();
    cfg.put_path(pool.to_str().unwrap()).put_size(1 << 20).put_force_create(true);
    assert_eq!(Db::open("cmap", cfg).unwrap_err().status(), Status::InvalidArgument);

    let mut cfg = Config::new();
    cfg.put_path(pool.to_str().unwrap()).put_create_if_missing(true);
    Db::open("cmap", cfg).unwrap();
}

#[test]
fn test_config_errors() {
    let dir = TempDir::new().unwrap();

    let err = Db::open("cmap", Config::new()).unwrap_err();
    assert_eq!(err.status(), Status::ConfigParsingError);

    let mut cfg = Config::new();
    cfg.put_path(dir.path().to_str().unwrap()).put_create_if_missing(true);
    let err = Db::open("cmap", cfg).unwrap_err();
    assert_eq!(err.status(), Status::ConfigParsingError, "size is required on creation");

    let mut cfg = Config::new();
    cfg.put_path(dir.path().to_str().unwrap()).put_string("size", "large").put_create_if_missing(true);
    let err = Db::open("cmap", cfg).unwrap_err();
    assert_eq!(err.status(), Status::ConfigTypeError);

    let mut cfg = Config::new();
    cfg.put_uint64("path", 7);
    let err = Db::open("radix", cfg).unwrap_err();
    assert_eq!(err.status(), Status::ConfigTypeError);

    let err = Db::open("btree", create_config(&dir, 1 << 20)).unwrap_err();
    assert_eq!(err.status(), Status::WrongEngineName);

    assert!(!dir.path().join("pool.meta").exists(), "no pool may be created by a failed open");
}

#[test]
fn test_oid_selects_separate_pools() {
    let dir = TempDir::new().unwrap();
    let open = |oid: u64| {
        let mut cfg = create_config(&dir, 1 << 20);
        cfg.put_oid(PoolObjectId(oid));
        Db::open("radix", cfg).unwrap()
    };

    let first = open(1);
    let second = open(2);
    first.put(b"k", b"one").unwrap();
    second.put(b"k", b"two").unwrap();
    assert_eq!(first.get(b"k").unwrap(), b"one");
    assert_eq!(second.get(b"k").unwrap(), b"two");
}

#[test]
fn test_blackhole_needs_no_path() {
    let db = Db::open("blackhole", Config::new()).unwrap();
    db.put(b"k", b"v").unwrap();
    assert_eq!(db.exists(b"k"), Status::NotFound);
    assert_eq!(db.count_all().unwrap(), 0);
    db.defrag(0, 100).unwrap();
    assert_eq!(db.tx_begin().unwrap_err().status(), Status::NotSupported);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_clients_share_db() {
    for engine in ["cmap", "csmap"] {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Db::open(engine, create_config(&dir, 1 << 22)).unwrap());

        let workers: Vec<_> = (0..4u8)
            .map(|t| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for i in 0..100u8 {
                        let key = [t, i];
                        db.put(&key, &[i; 8]).unwrap();
                        assert_eq!(db.get(&key).unwrap(), vec![i; 8]);
                        if i % 2 == 0 {
                            db.remove(&key).unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(db.count_all().unwrap(), 200, "{}", engine);
    }
}
