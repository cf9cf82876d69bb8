//! `cmap`: concurrent hash engine.
//!
//! The index is split into buckets chosen by `fast_hash`; each bucket is a
//! `hashbrown` map behind its own `RwLock`, so operations on keys in
//! different buckets never contend. Iteration order is unspecified.

use hashbrown::HashMap;
use log::warn;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::arena::RecordHandle;
use crate::comparator::BINARY_COMPARATOR_NAME;
use crate::config::{Config, PoolOptions};
use crate::engine::{feed, Engine, RecordCallback, ValueCallback};
use crate::error::{KvError, KvResult};
use crate::hash::{bucket_index, fast_hash};
use crate::pool::{Pool, PoolUsage};

pub const NAME: &str = "cmap";

const BUCKETS: usize = 64;

type Bucket = HashMap<Vec<u8>, RecordHandle>;

pub struct CMap {
    pool: Pool,
    buckets: Box<[RwLock<Bucket>]>,
}

impl CMap {
    pub fn open(config: &Config) -> KvResult<Self> {
        let options = PoolOptions::from_config(config)?;
        if options.comparator.is_some() {
            warn!("cmap keeps no order; ignoring the configured comparator");
        }

        let (pool, recovered) = Pool::open(NAME, &options, BINARY_COMPARATOR_NAME)?;
        let mut buckets: Vec<Bucket> = (0..BUCKETS).map(|_| Bucket::new()).collect();
        for (key, handle) in recovered {
            buckets[bucket_index(fast_hash(&key), BUCKETS)].insert(key, handle);
        }

        Ok(Self {
            pool,
            buckets: buckets.into_iter().map(RwLock::new).collect(),
        })
    }

    fn bucket(&self, key: &[u8]) -> &RwLock<Bucket> {
        &self.buckets[bucket_index(fast_hash(key), self.buckets.len())]
    }

    /// Copy every matching record while all buckets are read-locked.
    fn snapshot(&self, prefix: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let guards: Vec<RwLockReadGuard<'_, Bucket>> = self.buckets.iter().map(|b| b.read()).collect();
        let arena = self.pool.arena();
        guards
            .iter()
            .flat_map(|bucket| bucket.iter())
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .map(|(key, handle)| (key.clone(), arena.value(*handle).to_vec()))
            .collect()
    }

    pub fn usage(&self) -> PoolUsage {
        self.pool.usage()
    }
}

impl Engine for CMap {
    fn name(&self) -> &'static str {
        NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let mut bucket = self.bucket(key).write();
        let handle = self.pool.insert(key, value)?;
        if let Some(old) = bucket.insert(key.to_vec(), handle) {
            self.pool.release(old);
        }
        Ok(())
    }

    fn get_with(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()> {
        let bucket = self.bucket(key).read();
        let handle = *bucket.get(key).ok_or(KvError::NotFound)?;
        self.pool.with_record(handle, |_, value| callback(value));
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> KvResult<()> {
        if self.bucket(key).read().contains_key(key) {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn remove(&self, key: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let mut bucket = self.bucket(key).write();
        if !bucket.contains_key(key) {
            return Err(KvError::NotFound);
        }
        self.pool.log_remove(key)?;
        if let Some(handle) = bucket.remove(key) {
            self.pool.release(handle);
        }
        Ok(())
    }

    fn count_all(&self) -> KvResult<usize> {
        Ok(self.buckets.iter().map(|b| b.read().len()).sum())
    }

    fn count(&self, prefix: Option<&[u8]>) -> KvResult<usize> {
        match prefix {
            None => self.count_all(),
            Some(p) => Ok(self
                .buckets
                .iter()
                .map(|b| b.read().keys().filter(|k| k.starts_with(p)).count())
                .sum()),
        }
    }

    fn iterate(&self, prefix: Option<&[u8]>, callback: RecordCallback<'_>) -> KvResult<()> {
        let records = self.snapshot(prefix);
        feed(&records, callback)
    }

    fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<()> {
        self.pool.defrag(start_percent, end_percent).map(|_| ())
    }
}

impl std::fmt::Debug for CMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CMap").field("pool", &self.pool).field("buckets", &self.buckets.len()).finish()
    }
}
