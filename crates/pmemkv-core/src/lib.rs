//! pmemkv Core: pluggable persistent key-value engines
//!
//! Every engine keeps its records in a pool: a fixed-capacity arena in RAM
//! that is rebuilt on open from a durable write-ahead log.
//!
//! # Architecture
//!
//! - **Write path**: reserve arena space, append to the log and sync, then
//!   link the record into the engine's index
//! - **Read path**: look the key up in the index and read the arena in place
//! - **Engines**: `cmap` (hash), `csmap` (ordered by a comparator), `radix`
//!   (byte-ordered, transactional) and `blackhole`
//!
//! Engines are resolved by name through [`engine::open`] and shared as
//! `Arc<dyn Engine>`. The `pmemkv` crate wraps them in a database handle.

pub mod arena;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod hash;
pub mod lock;
pub mod meta;
pub mod platform_durability;
pub mod pool;
pub mod pstring;
pub mod radix_tree;
pub mod wal;

// Re-export key types for convenience
pub use comparator::{binary_comparator, BinaryComparator, Comparator, FnComparator, SharedComparator};
pub use config::{Config, ConfigValue, PoolObjectId};
pub use engine::{Engine, EngineKind, RecordCallback, ValueCallback};
pub use error::{KvError, KvResult, Status};
pub use format::Mutation;
pub use pool::{Pool, PoolUsage};
pub use pstring::PersistentString;
