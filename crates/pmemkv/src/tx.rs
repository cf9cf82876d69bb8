//! Write transactions.
//!
//! A `Transaction` buffers put/remove intents and hands them to the engine
//! as one batch on commit. Nothing staged is visible to readers until the
//! commit returns; a transaction dropped before commit discards its intents.

use std::marker::PhantomData;

use log::debug;

use pmemkv_core::format::{check_sizes, Mutation};
use pmemkv_core::{Engine, KvError, KvResult};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing staged yet
    New,
    /// At least one intent staged
    Staging,
    /// Batch applied
    Committed,
    /// Aborted, dropped, or failed to commit
    Discarded,
}

/// Batch of staged mutations against one engine.
///
/// Borrows the `Db` it came from and is confined to the creating thread.
pub struct Transaction<'db> {
    engine: &'db dyn Engine,
    staged: Vec<Mutation>,
    state: TxState,
    _not_send: PhantomData<*const ()>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(engine: &'db dyn Engine) -> Self {
        Self {
            engine,
            staged: Vec::new(),
            state: TxState::New,
            _not_send: PhantomData,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Number of staged intents.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Stage an insert or overwrite of `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_open("put")?;
        check_sizes(key, value)?;
        self.staged.push(Mutation::Put { key: key.to_vec(), value: value.to_vec() });
        self.state = TxState::Staging;
        Ok(())
    }

    /// Stage the removal of `key`. A key that is absent at commit time is
    /// left alone.
    pub fn remove(&mut self, key: &[u8]) -> KvResult<()> {
        self.check_open("remove")?;
        self.staged.push(Mutation::Remove { key: key.to_vec() });
        self.state = TxState::Staging;
        Ok(())
    }

    /// Apply every staged intent atomically.
    ///
    /// On failure nothing was applied, the intents are dropped and the
    /// transaction becomes `Discarded`.
    ///
    /// The pool must have room for every staged put next to the records
    /// the transaction removes or overwrites: their space is only returned
    /// once the commit is durable. A nearly full pool may therefore reject
    /// with `OutOfMemory` a swap that succeeds as two separate commits.
    pub fn commit(&mut self) -> KvResult<()> {
        self.check_open("commit")?;
        let staged = std::mem::take(&mut self.staged);
        match self.engine.commit_batch(&staged) {
            Ok(()) => {
                debug!("transaction committed {} intents", staged.len());
                self.finish(TxState::Committed);
                Ok(())
            }
            Err(e) => {
                debug!("transaction commit failed, discarding {} intents: {}", staged.len(), e);
                self.finish(TxState::Discarded);
                Err(e)
            }
        }
    }

    /// Discard every staged intent.
    pub fn abort(&mut self) -> KvResult<()> {
        self.check_open("abort")?;
        self.staged.clear();
        self.finish(TxState::Discarded);
        Ok(())
    }

    fn check_open(&self, operation: &str) -> KvResult<()> {
        match self.state {
            TxState::New | TxState::Staging => Ok(()),
            state => Err(KvError::TransactionScope {
                reason: format!("cannot {} a transaction that is {:?}", operation, state),
            }),
        }
    }

    /// Leave the open states and give the engine's transaction slot back.
    fn finish(&mut self, state: TxState) {
        self.state = state;
        self.engine.end_transaction();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state, TxState::New | TxState::Staging) {
            if !self.staged.is_empty() {
                debug!("transaction dropped without commit, discarding {} intents", self.staged.len());
            }
            self.finish(TxState::Discarded);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use pmemkv_core::{Config, Status};
    use tempfile::TempDir;

    fn open_radix(dir: &TempDir) -> Db {
        let mut cfg = Config::new();
        cfg.put_path(dir.path().to_str().unwrap()).put_size(1 << 20).put_create_if_missing(true);
        Db::open("radix", cfg).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let db = open_radix(&dir);

        let mut tx = db.tx_begin().unwrap();
        assert_eq!(tx.state(), TxState::New);
        tx.put(b"a", b"1").unwrap();
        assert_eq!(tx.state(), TxState::Staging);
        assert_eq!(tx.len(), 1);
        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert!(tx.is_empty());

        assert_eq!(tx.put(b"b", b"2").unwrap_err().status(), Status::TransactionScopeError);
        assert_eq!(tx.commit().unwrap_err().status(), Status::TransactionScopeError);
        assert_eq!(db.get(b"a").unwrap(), b"1");
    }

    #[test]
    fn test_empty_commit() {
        let dir = TempDir::new().unwrap();
        let db = open_radix(&dir);
        let mut tx = db.tx_begin().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(db.count_all().unwrap(), 0);
    }

    #[test]
    fn test_abort_discards() {
        let dir = TempDir::new().unwrap();
        let db = open_radix(&dir);
        let mut tx = db.tx_begin().unwrap();
        tx.put(b"a", b"1").unwrap();
        tx.abort().unwrap();
        assert_eq!(tx.state(), TxState::Discarded);
        assert_eq!(tx.abort().unwrap_err().status(), Status::TransactionScopeError);
        assert_eq!(db.exists(b"a"), Status::NotFound);
    }

    #[test]
    fn test_slot_released_on_resolve() {
        let dir = TempDir::new().unwrap();
        let db = open_radix(&dir);

        let mut first = db.tx_begin().unwrap();
        assert_eq!(db.tx_begin().unwrap_err().status(), Status::TransactionScopeError);
        first.commit().unwrap();

        let second = db.tx_begin().unwrap();
        drop(second);
        let mut third = db.tx_begin().unwrap();
        third.abort().unwrap();
        db.tx_begin().unwrap();
    }

    #[test]
    fn test_oversized_value_rejected_when_staged() {
        let dir = TempDir::new().unwrap();
        let db = open_radix(&dir);
        let mut tx = db.tx_begin().unwrap();
        let huge = vec![0u8; pmemkv_core::format::MAX_VALUE_SIZE + 1];
        assert_eq!(tx.put(b"k", &huge).unwrap_err().status(), Status::InvalidArgument);
        assert_eq!(tx.state(), TxState::New);
    }
}
