//! Persistent pool: lock, header, record arena and write-ahead log.
//!
//! A pool is what one engine instance owns while it is open. Records live in
//! the arena and are addressed by `RecordHandle`; the log makes them
//! durable. Opening replays the log into a fresh arena and hands the
//! recovered `(key, handle)` pairs to the engine so it can rebuild its index.
//!
//! Locking order for every engine: write gate, index lock(s), arena, log.
//! Writers hold the gate shared; `defrag` holds it exclusively so the arena
//! and the log describe the same record set while it checkpoints, and
//! engines without an index lock take it exclusively for snapshots.

use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{debug, info};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::arena::{Arena, DefragStats, RecordHandle};
use crate::config::{OpenMode, PoolOptions, OPT_SIZE};
use crate::error::{KvError, KvResult};
use crate::format::{check_sizes, Mutation, Operation};
use crate::lock::PoolLock;
use crate::meta::PoolMeta;
use crate::wal::{WalReader, WalWriter};

const LOG_DIR: &str = "log";

/// Space accounting of an open pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    pub capacity: u64,
    pub used_bytes: u64,
    pub hole_bytes: u64,
    /// Largest record footprint that would currently fit
    pub largest_free_extent: u64,
    pub records: usize,
}

/// Records recovered on open, in no particular order.
pub type Recovered = Vec<(Vec<u8>, RecordHandle)>;

pub struct Pool {
    root: PathBuf,
    meta: PoolMeta,
    gate: RwLock<()>,
    arena: RwLock<Arena>,
    wal: Mutex<WalWriter>,
    _lock: PoolLock,
}

impl Pool {
    /// Open or create the pool described by `options` for `engine`.
    ///
    /// `comparator` is the name recorded at creation and checked on reopen.
    /// Every failure after the lock is taken drops it again.
    pub fn open(engine: &str, options: &PoolOptions, comparator: &str) -> KvResult<(Self, Recovered)> {
        let root = options.root();

        if options.mode == OpenMode::OpenExisting && !PoolMeta::exists(&root) {
            return Err(KvError::invalid(format!(
                "no pool at {} (set create_if_missing to create one)",
                root.display()
            )));
        }
        if options.mode != OpenMode::OpenExisting && !PoolMeta::exists(&root) && options.size.is_none() {
            return Err(KvError::ConfigParsing {
                option: OPT_SIZE.into(),
                reason: "required when creating a pool".into(),
            });
        }

        fs::create_dir_all(&root).map_err(|e| KvError::io(&root, e, "failed to create pool directory"))?;
        let lock = PoolLock::acquire(&root)?;

        // Re-evaluated under the lock; another handle may have created it meanwhile.
        let meta = if PoolMeta::exists(&root) {
            if options.mode == OpenMode::CreateOrErrorIfExists {
                return Err(KvError::invalid(format!("pool already exists at {}", root.display())));
            }
            Self::check_existing(&root, engine, options, comparator)?
        } else {
            let size = options.size.ok_or_else(|| KvError::ConfigParsing {
                option: OPT_SIZE.into(),
                reason: "required when creating a pool".into(),
            })?;
            let meta = PoolMeta::new(engine, size, comparator)?;
            meta.write(&root)?;
            info!("created {} pool at {} ({} bytes)", engine, root.display(), size);
            meta
        };

        let log_dir = root.join(LOG_DIR);
        let (arena, recovered) = Self::replay(&log_dir, meta.capacity)?;
        let wal = WalWriter::new(&log_dir)?;

        info!(
            "opened {} pool at {}: {} records, {} of {} bytes used",
            engine,
            root.display(),
            recovered.len(),
            arena.used_bytes(),
            arena.capacity()
        );

        let pool = Self {
            root,
            meta,
            gate: RwLock::new(()),
            arena: RwLock::new(arena),
            wal: Mutex::new(wal),
            _lock: lock,
        };
        Ok((pool, recovered))
    }

    fn check_existing(root: &Path, engine: &str, options: &PoolOptions, comparator: &str) -> KvResult<PoolMeta> {
        let mut meta = PoolMeta::read(root)?;

        let persisted_engine = meta.engine_name();
        if persisted_engine != engine {
            return Err(KvError::invalid(format!(
                "pool at {} belongs to engine {}, not {}",
                root.display(),
                persisted_engine,
                engine
            )));
        }

        let persisted_comparator = meta.comparator_name();
        if persisted_comparator != comparator {
            return Err(KvError::ComparatorMismatch {
                persisted: persisted_comparator,
                supplied: comparator.to_string(),
            });
        }

        if let Some(size) = options.size {
            if size > meta.capacity {
                info!("growing pool {} from {} to {} bytes", root.display(), meta.capacity, size);
                meta.capacity = size;
                meta.write(root)?;
            }
        }
        Ok(meta)
    }

    /// Fold the log into the live record set and store it compactly.
    fn replay(log_dir: &Path, capacity: u64) -> KvResult<(Arena, Recovered)> {
        let mut live: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        let replayed = WalReader::new(log_dir).replay(|entry| {
            // A batch expands to its mutations; everything in it applies or nothing was logged.
            for mutation in entry.into_mutations()? {
                match mutation {
                    Mutation::Put { key, value } => {
                        live.insert(key, value);
                    }
                    Mutation::Remove { key } => {
                        live.remove(&key);
                    }
                }
            }
            Ok(())
        })?;
        debug!("replayed {} log entries from {}", replayed, log_dir.display());

        let mut arena = Arena::new(capacity);
        let mut recovered = Vec::with_capacity(live.len());
        for (key, value) in live {
            let handle = arena.store(&key, &value)?;
            recovered.push((key, handle));
        }
        Ok((arena, recovered))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &PoolMeta {
        &self.meta
    }

    /// Shared gate held by every mutating call.
    pub fn write_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Wait for in-flight writers and hold new ones off while the guard lives.
    pub fn quiesce_writers(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    pub fn arena(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read()
    }

    /// Store a record and make it durable.
    ///
    /// Space is reserved first, so `OutOfMemory` leaves nothing in the log.
    /// The record is not reachable until the caller links the handle into
    /// its index.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> KvResult<RecordHandle> {
        check_sizes(key, value)?;
        let handle = self.arena.write().store(key, value)?;
        if let Err(e) = self.wal.lock().append(key, value, Operation::Put) {
            self.arena.write().free(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Durably record the removal of `key`. The caller unlinks and releases
    /// the record afterwards.
    pub fn log_remove(&self, key: &[u8]) -> KvResult<()> {
        self.wal.lock().append(key, &[], Operation::Remove)
    }

    /// Durably record a group of mutations as one entry.
    pub fn log_batch(&self, mutations: &[Mutation]) -> KvResult<()> {
        self.wal.lock().append_batch(mutations)
    }

    /// Reserve space for several records at once. On failure everything
    /// reserved so far is released.
    pub fn reserve_all<'a, I>(&self, records: I) -> KvResult<Vec<RecordHandle>>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut arena = self.arena.write();
        let mut handles = Vec::new();
        for (key, value) in records {
            let stored = check_sizes(key, value).and_then(|_| arena.store(key, value));
            match stored {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in handles {
                        arena.free(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Free a record no index refers to anymore.
    pub fn release(&self, handle: RecordHandle) {
        self.arena.write().free(handle);
    }

    /// Free several records under one lock acquisition.
    pub fn release_all(&self, handles: impl IntoIterator<Item = RecordHandle>) {
        let mut arena = self.arena.write();
        for handle in handles {
            arena.free(handle);
        }
    }

    /// Run `f` on a record's bytes under the arena read lock.
    pub fn with_record<R>(&self, handle: RecordHandle, f: impl FnOnce(&[u8], &[u8]) -> R) -> R {
        let arena = self.arena.read();
        let (key, value) = arena.record(handle);
        f(key, value)
    }

    /// Compact the arena, then rewrite the log as a snapshot of the live set.
    ///
    /// Waits for in-flight writers and blocks new ones until done. Readers
    /// only wait for the arena pass. Checkpoint failures are reported as
    /// `DefragError`; the record set is unchanged either way.
    pub fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<DefragStats> {
        let _exclusive = self.gate.write();
        let stats = self.arena.write().defrag(start_percent, end_percent)?;

        let arena = self.arena.read();
        let mut wal = self.wal.lock();
        wal.checkpoint(arena.records()).map_err(|e| KvError::Defrag {
            reason: format!("log checkpoint failed: {}", e),
        })?;

        info!(
            "defragmented {} ({}..{}%): {} of {} candidates moved, {} bytes",
            self.root.display(),
            start_percent,
            end_percent,
            stats.relocated,
            stats.candidates,
            stats.bytes_moved
        );
        Ok(stats)
    }

    pub fn usage(&self) -> PoolUsage {
        let arena = self.arena.read();
        PoolUsage {
            capacity: arena.capacity(),
            used_bytes: arena.used_bytes(),
            hole_bytes: arena.hole_bytes(),
            largest_free_extent: arena.largest_free_extent(),
            records: arena.len(),
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        debug!("closing pool {}", self.root.display());
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("root", &self.root)
            .field("engine", &self.meta.engine_name())
            .field("capacity", &self.meta.capacity)
            .finish()
    }
}
