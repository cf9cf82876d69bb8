//! `radix`: transactional radix-tree engine.
//!
//! Keys are ordered byte-wise. One writer at a time (puts, removes and
//! commits serialize on `writer`), any number of readers: the tree lock is
//! only write-locked to link records that are already durable, so readers
//! never wait on a log sync.
//!
//! A transaction commits as a single batch log entry; the tree write lock
//! is held while the batch is linked in, so readers observe all of it or
//! none of it. At most one transaction may be open at a time.
//!
//! Space for a batch's puts is reserved before it is logged, while the
//! records it removes or overwrites are still visible to readers. A batch
//! therefore needs free space for all of its puts on top of what the pool
//! already holds, even when it removes records of the same size.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::arena::RecordHandle;
use crate::comparator::BINARY_COMPARATOR_NAME;
use crate::config::{Config, PoolOptions, OPT_COMPARATOR};
use crate::engine::{empty_range, feed, Engine, RecordCallback, ValueCallback};
use crate::error::{KvError, KvResult};
use crate::format::Mutation;
use crate::meta::PoolMeta;
use crate::pool::Pool;
use crate::radix_tree::RadixTree;

pub const NAME: &str = "radix";

pub struct Radix {
    pool: Pool,
    tree: RwLock<RadixTree<RecordHandle>>,
    writer: Mutex<()>,
    transaction_open: AtomicBool,
}

impl Radix {
    pub fn open(config: &Config) -> KvResult<Self> {
        let options = PoolOptions::from_config(config)?;
        let comparator = options.comparator.as_ref().map_or(BINARY_COMPARATOR_NAME, |c| c.name());

        // An existing pool reports the mismatch against its recorded comparator.
        if comparator != BINARY_COMPARATOR_NAME && !PoolMeta::exists(&options.root()) {
            return Err(KvError::invalid(format!(
                "{} orders keys byte-wise; {} comparator {:?} is not supported",
                NAME, OPT_COMPARATOR, comparator
            )));
        }

        let (pool, recovered) = Pool::open(NAME, &options, comparator)?;
        let tree: RadixTree<RecordHandle> = recovered.into_iter().collect();

        Ok(Self {
            pool,
            tree: RwLock::new(tree),
            writer: Mutex::new(()),
            transaction_open: AtomicBool::new(false),
        })
    }

    /// Copy records, in key order, produced by `select` under the tree read lock.
    fn snapshot(&self, select: impl FnOnce(&RadixTree<RecordHandle>) -> Vec<(Vec<u8>, RecordHandle)>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tree = self.tree.read();
        let selected = select(&tree);
        let arena = self.pool.arena();
        selected
            .into_iter()
            .map(|(key, handle)| {
                let value = arena.value(handle).to_vec();
                (key, value)
            })
            .collect()
    }
}

impl Engine for Radix {
    fn name(&self) -> &'static str {
        NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let _writer = self.writer.lock();
        let handle = self.pool.insert(key, value)?;
        let old = self.tree.write().insert(key, handle);
        if let Some(old) = old {
            self.pool.release(old);
        }
        Ok(())
    }

    fn get_with(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()> {
        let tree = self.tree.read();
        let handle = tree.get(key).ok_or(KvError::NotFound)?;
        self.pool.with_record(handle, |_, value| callback(value));
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> KvResult<()> {
        if self.tree.read().contains_key(key) {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn remove(&self, key: &[u8]) -> KvResult<()> {
        let _gate = self.pool.write_gate();
        let _writer = self.writer.lock();
        if !self.tree.read().contains_key(key) {
            return Err(KvError::NotFound);
        }
        self.pool.log_remove(key)?;
        let removed = self.tree.write().remove(key);
        if let Some(handle) = removed {
            self.pool.release(handle);
        }
        Ok(())
    }

    fn count_all(&self) -> KvResult<usize> {
        Ok(self.tree.read().len())
    }

    fn count(&self, prefix: Option<&[u8]>) -> KvResult<usize> {
        match prefix {
            None => self.count_all(),
            Some(p) => Ok(self.tree.read().count_prefixed(p)),
        }
    }

    fn iterate(&self, prefix: Option<&[u8]>, callback: RecordCallback<'_>) -> KvResult<()> {
        let records = self.snapshot(|tree| tree.prefixed(prefix.unwrap_or_default()));
        feed(&records, callback)
    }

    fn count_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> KvResult<usize> {
        if empty_range(lower, upper, |a, b| a.cmp(b)) {
            return Ok(0);
        }
        let mut count = 0;
        self.tree.read().for_each_in_range(lower, upper, |_, _| count += 1);
        Ok(count)
    }

    fn get_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, callback: RecordCallback<'_>) -> KvResult<()> {
        if empty_range(lower, upper, |a, b| a.cmp(b)) {
            return Ok(());
        }
        let records = self.snapshot(|tree| {
            let mut selected = Vec::new();
            tree.for_each_in_range(lower, upper, |key, handle| selected.push((key.to_vec(), handle)));
            selected
        });
        feed(&records, callback)
    }

    fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<()> {
        self.pool.defrag(start_percent, end_percent).map(|_| ())
    }

    fn begin_transaction(&self) -> KvResult<()> {
        self.transaction_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| KvError::TransactionScope {
                reason: "another transaction is already open on this engine".into(),
            })
    }

    fn commit_batch(&self, mutations: &[Mutation]) -> KvResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let _gate = self.pool.write_gate();
        let _writer = self.writer.lock();

        let puts = mutations.iter().filter_map(|m| match m {
            Mutation::Put { key, value } => Some((key.as_slice(), value.as_slice())),
            Mutation::Remove { .. } => None,
        });
        let handles = self.pool.reserve_all(puts)?;
        if let Err(e) = self.pool.log_batch(mutations) {
            self.pool.release_all(handles);
            return Err(e);
        }

        let mut freed = Vec::new();
        {
            let mut tree = self.tree.write();
            let mut reserved = handles.into_iter();
            for mutation in mutations {
                let previous = match mutation {
                    Mutation::Put { key, .. } => match reserved.next() {
                        Some(handle) => tree.insert(key, handle),
                        None => None,
                    },
                    Mutation::Remove { key } => tree.remove(key),
                };
                freed.extend(previous);
            }
        }
        self.pool.release_all(freed);

        debug!("committed batch of {} mutations", mutations.len());
        Ok(())
    }

    fn end_transaction(&self) {
        self.transaction_open.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Radix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radix")
            .field("pool", &self.pool)
            .field("transaction_open", &self.transaction_open.load(Ordering::Relaxed))
            .finish()
    }
}
