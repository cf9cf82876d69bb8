//! Engine abstraction and registry
//!
//! Every engine implements `Engine`. Capabilities an engine does not have
//! keep the default bodies, which fail with `NotSupported`, so callers can
//! check for a capability by calling it.
//!
//! **Registry**: `open(name, config)` resolves `name` to an `EngineKind`
//! once; the hot path never looks at the name again.

use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{KvError, KvResult};
use crate::format::Mutation;

pub mod blackhole;
pub mod cmap;
pub mod csmap;
pub mod radix;

pub use blackhole::Blackhole;
pub use cmap::CMap;
pub use csmap::CSMap;
pub use radix::Radix;

/// Callback fed by `iterate` and the `get_*` range queries. A non-zero
/// return stops the walk.
pub type RecordCallback<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> i32;

/// Callback receiving a value in place.
pub type ValueCallback<'a> = &'a mut dyn FnMut(&[u8]);

/// Key/value engine over a persistent pool.
///
/// All methods take `&self`; engines are shared as `Arc<dyn Engine>` and do
/// their own locking.
pub trait Engine: Send + Sync {
    /// Registered engine name
    fn name(&self) -> &'static str;

    /// Insert or overwrite `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Hand the value of `key` to `callback` without copying it out.
    ///
    /// The engine holds its read locks while `callback` runs; the callback
    /// must not call back into the engine.
    fn get_with(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()>;

    /// Remove `key`; `NotFound` if it is absent.
    fn remove(&self, key: &[u8]) -> KvResult<()>;

    /// Number of records.
    fn count_all(&self) -> KvResult<usize>;

    /// Copy of the value stored under `key`.
    fn get(&self, key: &[u8]) -> KvResult<Vec<u8>> {
        let mut out = None;
        self.get_with(key, &mut |value: &[u8]| out = Some(value.to_vec()))?;
        out.ok_or(KvError::NotFound)
    }

    /// `Ok` if `key` is present, `NotFound` otherwise.
    fn exists(&self, key: &[u8]) -> KvResult<()> {
        self.get_with(key, &mut |_: &[u8]| {})
    }

    /// Number of records whose key starts with `prefix`.
    fn count(&self, prefix: Option<&[u8]>) -> KvResult<usize> {
        match prefix {
            None => self.count_all(),
            Some(_) => Err(self.unsupported("count")),
        }
    }

    /// Walk a point-in-time snapshot of the records whose key starts with
    /// `prefix`, in the engine's order.
    fn iterate(&self, _prefix: Option<&[u8]>, _callback: RecordCallback<'_>) -> KvResult<()> {
        Err(self.unsupported("iterate"))
    }

    /// Count keys within the bounds, ordered by the engine's comparator.
    fn count_range(&self, _lower: Bound<&[u8]>, _upper: Bound<&[u8]>) -> KvResult<usize> {
        Err(self.unsupported("count_range"))
    }

    /// Walk records within the bounds in ascending order.
    fn get_range(&self, _lower: Bound<&[u8]>, _upper: Bound<&[u8]>, _callback: RecordCallback<'_>) -> KvResult<()> {
        Err(self.unsupported("get_range"))
    }

    /// Compact the storage occupied by records ranked within
    /// `[start_percent, end_percent]`. Never changes the record set.
    fn defrag(&self, _start_percent: u8, _end_percent: u8) -> KvResult<()> {
        Err(self.unsupported("defrag"))
    }

    /// Claim the engine's transaction slot.
    fn begin_transaction(&self) -> KvResult<()> {
        Err(self.unsupported("transaction"))
    }

    /// Apply `mutations` as one atomic, durable unit.
    ///
    /// Space for every put is reserved before the records being removed or
    /// overwritten are freed, so a batch that would only fit after its own
    /// removals fails with `OutOfMemory`.
    fn commit_batch(&self, _mutations: &[Mutation]) -> KvResult<()> {
        Err(self.unsupported("transaction"))
    }

    /// Release the slot claimed by `begin_transaction`.
    fn end_transaction(&self) {}

    fn unsupported(&self, operation: &'static str) -> KvError {
        KvError::NotSupported { engine: self.name(), operation }
    }
}

/// Registered engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Concurrent hash map
    CMap,
    /// Concurrent map ordered by a comparator
    CSMap,
    /// Transactional radix tree
    Radix,
    /// Accepts every write, stores nothing
    Blackhole,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [EngineKind::CMap, EngineKind::CSMap, EngineKind::Radix, EngineKind::Blackhole];

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::CMap => cmap::NAME,
            EngineKind::CSMap => csmap::NAME,
            EngineKind::Radix => radix::NAME,
            EngineKind::Blackhole => blackhole::NAME,
        }
    }

    /// Validate `config` and open an engine of this kind.
    pub fn open(self, config: &Config) -> KvResult<Arc<dyn Engine>> {
        Ok(match self {
            EngineKind::CMap => Arc::new(CMap::open(config)?),
            EngineKind::CSMap => Arc::new(CSMap::open(config)?),
            EngineKind::Radix => Arc::new(Radix::open(config)?),
            EngineKind::Blackhole => Arc::new(Blackhole::open(config)?),
        })
    }
}

impl FromStr for EngineKind {
    type Err = KvError;

    fn from_str(name: &str) -> KvResult<Self> {
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| KvError::WrongEngineName { name: name.to_string() })
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Open the engine registered as `name`.
pub fn open(name: &str, config: &Config) -> KvResult<Arc<dyn Engine>> {
    name.parse::<EngineKind>()?.open(config)
}

/// Feed a materialised snapshot to `callback`.
pub(crate) fn feed(records: &[(Vec<u8>, Vec<u8>)], callback: RecordCallback<'_>) -> KvResult<()> {
    for (key, value) in records {
        let code = callback(key, value);
        if code != 0 {
            return Err(KvError::StoppedByCallback { code });
        }
    }
    Ok(())
}

/// True if `key` lies within the bounds under `cmp`.
pub(crate) fn in_bounds(
    key: &[u8],
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    cmp: impl Fn(&[u8], &[u8]) -> std::cmp::Ordering,
) -> bool {
    use std::cmp::Ordering::*;
    let above = match lower {
        Bound::Unbounded => true,
        Bound::Included(l) => cmp(key, l) != Less,
        Bound::Excluded(l) => cmp(key, l) == Greater,
    };
    let below = match upper {
        Bound::Unbounded => true,
        Bound::Included(u) => cmp(key, u) != Greater,
        Bound::Excluded(u) => cmp(key, u) == Less,
    };
    above && below
}

/// True if no key can satisfy both bounds.
pub(crate) fn empty_range(
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    cmp: impl Fn(&[u8], &[u8]) -> std::cmp::Ordering,
) -> bool {
    use std::cmp::Ordering::*;
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => cmp(l, u) == Greater,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => cmp(l, u) != Less,
        _ => false,
    }
}
