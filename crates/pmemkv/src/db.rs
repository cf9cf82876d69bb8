//! The `Db` handle: an open engine plus the transaction factory.

use std::ops::Bound;
use std::sync::Arc;

use log::info;

use pmemkv_core::{Config, Engine, EngineKind, KvResult, Status};

use crate::tx::Transaction;

/// An open database.
///
/// Wraps the engine resolved at open time; every call dispatches straight to
/// it. The handle is `Send + Sync`, so it can be shared behind an `Arc` with
/// engines that support concurrent callers. Dropping it closes the engine and
/// releases the pool; persisted records are kept.
pub struct Db {
    engine: Arc<dyn Engine>,
    kind: EngineKind,
}

impl Db {
    /// Open the engine registered as `engine`. The config is consumed.
    pub fn open(engine: &str, config: Config) -> KvResult<Self> {
        let kind: EngineKind = engine.parse()?;
        let engine = kind.open(&config)?;
        info!("opened {} engine", kind);
        Ok(Self { engine, kind })
    }

    /// Close the database. Equivalent to dropping it.
    pub fn close(self) {
        info!("closing {} engine", self.kind);
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.engine.put(key, value)
    }

    pub fn get(&self, key: &[u8]) -> KvResult<Vec<u8>> {
        self.engine.get(key)
    }

    /// Read a value in place. The callback runs under the engine's read
    /// locks and must not call back into this database.
    pub fn get_with<F>(&self, key: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8]),
    {
        self.engine.get_with(key, &mut callback)
    }

    pub fn remove(&self, key: &[u8]) -> KvResult<()> {
        self.engine.remove(key)
    }

    /// `Status::Ok` if `key` is present, `Status::NotFound` if not.
    pub fn exists(&self, key: &[u8]) -> Status {
        match self.engine.exists(key) {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    pub fn count_all(&self) -> KvResult<usize> {
        self.engine.count_all()
    }

    /// Number of keys starting with `prefix`, or all keys for `None`.
    pub fn count(&self, prefix: Option<&[u8]>) -> KvResult<usize> {
        self.engine.count(prefix)
    }

    /// Visit records whose key starts with `prefix`. A non-zero callback
    /// return stops the walk with `StoppedByCallback`.
    pub fn iterate<F>(&self, prefix: Option<&[u8]>, mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.iterate(prefix, &mut callback)
    }

    pub fn get_all<F>(&self, callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.iterate(None, callback)
    }

    pub fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<()> {
        self.engine.defrag(start_percent, end_percent)
    }

    /// Start a transaction. Only engines with transaction support accept
    /// this; the others return `NotSupported`.
    pub fn tx_begin(&self) -> KvResult<Transaction<'_>> {
        self.engine.begin_transaction()?;
        Ok(Transaction::new(self.engine.as_ref()))
    }

    // Ordered range queries. `between` excludes both ends.

    pub fn count_above(&self, key: &[u8]) -> KvResult<usize> {
        self.engine.count_range(Bound::Excluded(key), Bound::Unbounded)
    }

    pub fn count_equal_above(&self, key: &[u8]) -> KvResult<usize> {
        self.engine.count_range(Bound::Included(key), Bound::Unbounded)
    }

    pub fn count_below(&self, key: &[u8]) -> KvResult<usize> {
        self.engine.count_range(Bound::Unbounded, Bound::Excluded(key))
    }

    pub fn count_equal_below(&self, key: &[u8]) -> KvResult<usize> {
        self.engine.count_range(Bound::Unbounded, Bound::Included(key))
    }

    pub fn count_between(&self, lower: &[u8], upper: &[u8]) -> KvResult<usize> {
        self.engine.count_range(Bound::Excluded(lower), Bound::Excluded(upper))
    }

    pub fn get_above<F>(&self, key: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.get_range(Bound::Excluded(key), Bound::Unbounded, &mut callback)
    }

    pub fn get_equal_above<F>(&self, key: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.get_range(Bound::Included(key), Bound::Unbounded, &mut callback)
    }

    pub fn get_below<F>(&self, key: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.get_range(Bound::Unbounded, Bound::Excluded(key), &mut callback)
    }

    pub fn get_equal_below<F>(&self, key: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.get_range(Bound::Unbounded, Bound::Included(key), &mut callback)
    }

    pub fn get_between<F>(&self, lower: &[u8], upper: &[u8], mut callback: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> i32,
    {
        self.engine.get_range(Bound::Excluded(lower), Bound::Excluded(upper), &mut callback)
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("engine", &self.kind)
            .field("records", &self.engine.count_all().ok())
            .finish()
    }
}
