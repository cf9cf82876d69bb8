//! `csmap`: concurrent map ordered by a comparator.
//!
//! The index is a lock-free `SkipMap` whose keys carry the pool's
//! comparator. Writers of the same key are serialized by a striped mutex
//! picked with `fast_hash`; writers of unrelated keys and all readers
//! proceed in parallel.
//!
//! A single-key read looks its handle up while holding the arena read
//! lock, and a replaced record is only freed under the arena write lock,
//! so a reader never follows a handle that was already released. Whole-map
//! snapshots quiesce writers for the duration of the copy.

use std::cmp::Ordering;
use std::ops::Bound;

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use crate::arena::RecordHandle;
use crate::comparator::{binary_comparator, SharedComparator};
use crate::config::{Config, PoolOptions};
use crate::engine::{empty_range, feed, in_bounds, Engine, RecordCallback, ValueCallback};
use crate::error::{KvError, KvResult};
use crate::hash::{bucket_index, fast_hash};
use crate::pool::Pool;

pub const NAME: &str = "csmap";

const WRITE_STRIPES: usize = 32;

/// Index key ordered by the pool comparator.
struct OrderedKey {
    bytes: Vec<u8>,
    order: SharedComparator,
}

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.bytes, &other.bytes)
    }
}

type Index = SkipMap<OrderedKey, RecordHandle>;

pub struct CSMap {
    pool: Pool,
    comparator: SharedComparator,
    index: Index,
    stripes: Box<[Mutex<()>]>,
}

impl CSMap {
    pub fn open(config: &Config) -> KvResult<Self> {
        let options = PoolOptions::from_config(config)?;
        let comparator = options.comparator.clone().unwrap_or_else(binary_comparator);

        let (pool, recovered) = Pool::open(NAME, &options, comparator.name())?;
        let index = Index::new();
        for (bytes, handle) in recovered {
            index.insert(OrderedKey { bytes, order: comparator.clone() }, handle);
        }

        Ok(Self {
            pool,
            comparator,
            index,
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    fn ordered(&self, key: &[u8]) -> OrderedKey {
        OrderedKey { bytes: key.to_vec(), order: self.comparator.clone() }
    }

    fn stripe(&self, key: &[u8]) -> &Mutex<()> {
        &self.stripes[bucket_index(fast_hash(key), self.stripes.len())]
    }

    fn to_bound(&self, bound: Bound<&[u8]>) -> Bound<OrderedKey> {
        match bound {
            Bound::Included(key) => Bound::Included(self.ordered(key)),
            Bound::Excluded(key) => Bound::Excluded(self.ordered(key)),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    /// Copy the records within the bounds, in comparator order, as of one
    /// point in time.
    fn snapshot_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        if empty_range(lower, upper, |a, b| self.comparator.compare(a, b)) {
            return Vec::new();
        }
        let range = (self.to_bound(lower), self.to_bound(upper));
        let _quiet = self.pool.quiesce_writers();
        let arena = self.pool.arena();
        self.index
            .range(range)
            .map(|entry| (entry.key().bytes.clone(), arena.value(*entry.value()).to_vec()))
            .collect()
    }

    pub fn comparator(&self) -> &SharedComparator {
        &self.comparator
    }
}

impl Engine for CSMap {
    fn name(&self) -> &'static str {
        NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let _writer = self.stripe(key).lock();
        let handle = self.pool.insert(key, value)?;
        let ordered = self.ordered(key);
        // Same-key writers hold the stripe, so the entry cannot change between these two calls.
        let old = self.index.get(&ordered).map(|entry| *entry.value());
        self.index.insert(ordered, handle);
        if let Some(old) = old {
            self.pool.release(old);
        }
        Ok(())
    }

    fn get_with(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()> {
        let arena = self.pool.arena();
        let entry = self.index.get(&self.ordered(key)).ok_or(KvError::NotFound)?;
        callback(arena.value(*entry.value()));
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> KvResult<()> {
        if self.index.contains_key(&self.ordered(key)) {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn remove(&self, key: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let _writer = self.stripe(key).lock();
        let ordered = self.ordered(key);
        if !self.index.contains_key(&ordered) {
            return Err(KvError::NotFound);
        }
        self.pool.log_remove(key)?;
        if let Some(entry) = self.index.remove(&ordered) {
            self.pool.release(*entry.value());
        }
        Ok(())
    }

    fn count_all(&self) -> KvResult<usize> {
        Ok(self.index.len())
    }

    fn count(&self, prefix: Option<&[u8]>) -> KvResult<usize> {
        match prefix {
            None => self.count_all(),
            Some(p) => Ok(self.index.iter().filter(|entry| entry.key().bytes.starts_with(p)).count()),
        }
    }

    fn iterate(&self, prefix: Option<&[u8]>, callback: RecordCallback<'_>) -> KvResult<()> {
        let mut records = self.snapshot_range(Bound::Unbounded, Bound::Unbounded);
        if let Some(p) = prefix {
            records.retain(|(key, _)| key.starts_with(p));
        }
        feed(&records, callback)
    }

    fn count_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> KvResult<usize> {
        if empty_range(lower, upper, |a, b| self.comparator.compare(a, b)) {
            return Ok(0);
        }
        let range = (self.to_bound(lower), self.to_bound(upper));
        Ok(self.index.range(range).count())
    }

    fn get_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, callback: RecordCallback<'_>) -> KvResult<()> {
        let records = self.snapshot_range(lower, upper);
        debug_assert!(records
            .iter()
            .all(|(k, _)| in_bounds(k, lower, upper, |a, b| self.comparator.compare(a, b))));
        feed(&records, callback)
    }

    fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<()> {
        self.pool.defrag(start_percent, end_percent).map(|_| ())
    }
}

impl std::fmt::Debug for CSMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CSMap")
            .field("pool", &self.pool)
            .field("comparator", &self.comparator.name())
            .field("records", &self.index.len())
            .finish()
    }
}
