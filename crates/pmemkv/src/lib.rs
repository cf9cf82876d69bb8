//! pmemkv: embedded persistent key-value database
//!
//! `Db` is the only object applications need: it resolves an engine by name,
//! opens its pool from a `Config`, and hands out transactions.
//!
//! ```no_run
//! use pmemkv::{Config, Db, Status};
//!
//! let mut config = Config::new();
//! config.put_path("/tmp/pmemkv-demo").put_size(64 << 20).put_create_if_missing(true);
//!
//! let db = Db::open("radix", config)?;
//! db.put(b"key1", b"value1")?;
//!
//! let mut tx = db.tx_begin()?;
//! tx.remove(b"key1")?;
//! tx.put(b"key2", b"value2")?;
//! tx.commit()?;
//! assert_eq!(db.exists(b"key1"), Status::NotFound);
//! # Ok::<(), pmemkv::KvError>(())
//! ```

pub mod db;
pub mod tx;

pub use db::Db;
pub use tx::{Transaction, TxState};

pub use pmemkv_core::{
    binary_comparator, Comparator, Config, EngineKind, FnComparator, KvError, KvResult, PoolObjectId,
    SharedComparator, Status,
};
