//! # Ordered KV Engine Boundary
//!
//! Everything below the adapter is an ordered key-value engine exposing
//! transactional trees. The traits here are the whole contract:
//!
//! | Trait        | Role                                              |
//! |--------------|---------------------------------------------------|
//! | [`TreeStore`]| Engine handle; hands out transactions             |
//! | [`StoreTxn`] | One transaction; point ops, cursors, commit       |
//! | [`TreeCursor`]| Bidirectional iteration over one tree            |
//!
//! `StoreTxn` takes `&self` for reads and writes so cursors and mutations
//! can coexist on one transaction; implementations use interior locking.
//! Writes carry a step number and cursors a visible step, which is how
//! a statement's own writes are kept out of its driving scans.
//!
//! [`TxnGuard`] wraps a transaction so an early return rolls back instead
//! of leaking it.

pub mod mem;

pub use mem::MemoryStore;

use eyre::Result;

/// Identifies one ordered tree inside the engine. Groups and group indexes
/// each own a tree; the ids are assigned at schema build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub trait TreeStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>>;
}

pub trait StoreTxn: Send {
    fn get(&self, tree: TreeId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write `key -> value`, tagging the write with the session's update
    /// step so later cursors can decide whether to see it.
    fn put(&self, tree: TreeId, key: &[u8], value: &[u8], step: u64) -> Result<()>;

    /// Remove `key`; returns whether a live entry existed. The tombstone is
    /// step-tagged like a write.
    fn delete(&self, tree: TreeId, key: &[u8], step: u64) -> Result<bool>;

    /// Open a cursor that sees committed data plus this transaction's own
    /// writes with step `<= visible_step`.
    fn open_cursor(&self, tree: TreeId, visible_step: u64) -> Result<Box<dyn TreeCursor>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self);
}

pub trait TreeCursor: Send {
    /// Position at `key`. The next `next()` yields the first entry at or
    /// after it; the next `prev()` yields the last entry at or before it.
    fn seek(&mut self, key: &[u8]);

    fn next(&mut self) -> Result<Option<TreeEntry>>;

    fn prev(&mut self) -> Result<Option<TreeEntry>>;
}

/// Rolls the wrapped transaction back on drop unless it was committed.
pub struct TxnGuard<'a> {
    txn: Box<dyn StoreTxn + 'a>,
    finished: bool,
}

impl<'a> TxnGuard<'a> {
    pub fn begin(store: &'a dyn TreeStore) -> Result<Self> {
        Ok(Self {
            txn: store.begin()?,
            finished: false,
        })
    }

    pub fn txn(&self) -> &(dyn StoreTxn + 'a) {
        &*self.txn
    }

    /// Consuming commit; a failed commit leaves nothing to roll back.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.txn.commit()
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.txn.rollback();
        }
    }
}
