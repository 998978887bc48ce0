//! In-memory reference engine.
//!
//! Each tree is a `BTreeMap` of committed entries; a transaction buffers
//! its writes in a per-tree overlay and publishes them at commit under a
//! global sequence number. Conflict handling is first-committer-wins: if
//! any key a transaction wrote was committed by someone else after the
//! transaction began, commit fails with a retryable conflict.
//!
//! Reads see the latest committed data plus the transaction's own overlay.
//! Overlay entries carry the update step they were written under, and a
//! cursor skips own writes newer than its visible step, falling back to
//! the committed entry for that key. This is what keeps a mutation
//! statement's driving scan from observing the rows it is inserting.
//!
//! `induce_conflicts` makes the next N commits fail artificially, for
//! exercising retry paths.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::Fault;

use super::{StoreTxn, TreeCursor, TreeEntry, TreeId, TreeStore};

struct CommittedEntry {
    value: Vec<u8>,
    seq: u64,
}

struct OverlayEntry {
    /// `None` is a tombstone.
    value: Option<Vec<u8>>,
    step: u64,
}

type CommittedTrees = HashMap<TreeId, BTreeMap<Vec<u8>, CommittedEntry>>;
type OverlayTrees = HashMap<TreeId, BTreeMap<Vec<u8>, OverlayEntry>>;

struct Shared {
    committed: Mutex<CommittedTrees>,
    seq: AtomicU64,
    induce: AtomicU32,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                induce: AtomicU32::new(0),
            }),
        }
    }

    /// Fail the next `n` commits with a retryable conflict.
    pub fn induce_conflicts(&self, n: u32) {
        self.shared.induce.fetch_add(n, Ordering::SeqCst);
    }

    /// Committed entry count of one tree. Test visibility only.
    pub fn committed_len(&self, tree: TreeId) -> usize {
        self.shared
            .committed
            .lock()
            .get(&tree)
            .map_or(0, BTreeMap::len)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        Ok(Box::new(MemTxn {
            shared: Arc::clone(&self.shared),
            overlay: Arc::new(Mutex::new(HashMap::new())),
            begin_seq: self.shared.seq.load(Ordering::SeqCst),
        }))
    }
}

struct MemTxn {
    shared: Arc<Shared>,
    /// Shared with cursors, which outlive no transaction but hold their
    /// own handle so `open_cursor` can return an owned box.
    overlay: Arc<Mutex<OverlayTrees>>,
    begin_seq: u64,
}

impl StoreTxn for MemTxn {
    fn get(&self, tree: TreeId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.overlay.lock().get(&tree).and_then(|m| m.get(key)) {
            return Ok(entry.value.clone());
        }
        Ok(self
            .shared
            .committed
            .lock()
            .get(&tree)
            .and_then(|m| m.get(key))
            .map(|e| e.value.clone()))
    }

    fn put(&self, tree: TreeId, key: &[u8], value: &[u8], step: u64) -> Result<()> {
        self.overlay.lock().entry(tree).or_default().insert(
            key.to_vec(),
            OverlayEntry {
                value: Some(value.to_vec()),
                step,
            },
        );
        Ok(())
    }

    fn delete(&self, tree: TreeId, key: &[u8], step: u64) -> Result<bool> {
        let existed = self.get(tree, key)?.is_some();
        self.overlay.lock().entry(tree).or_default().insert(
            key.to_vec(),
            OverlayEntry { value: None, step },
        );
        Ok(existed)
    }

    fn open_cursor(&self, tree: TreeId, visible_step: u64) -> Result<Box<dyn TreeCursor>> {
        Ok(Box::new(MemCursor {
            shared: Arc::clone(&self.shared),
            overlay: Arc::clone(&self.overlay),
            tree,
            visible_step,
            anchor: Anchor::Start,
        }))
    }

    fn commit(&mut self) -> Result<()> {
        if induced_failure(&self.shared.induce) {
            self.overlay.lock().clear();
            bail!(Fault::TransactionConflict);
        }
        let overlay = std::mem::take(&mut *self.overlay.lock());
        let mut committed = self.shared.committed.lock();
        for (tree, writes) in &overlay {
            if let Some(tree_map) = committed.get(tree) {
                for key in writes.keys() {
                    if tree_map.get(key).is_some_and(|e| e.seq > self.begin_seq) {
                        bail!(Fault::TransactionConflict);
                    }
                }
            }
        }
        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        for (tree, writes) in overlay {
            let tree_map = committed.entry(tree).or_default();
            for (key, entry) in writes {
                match entry.value {
                    Some(value) => {
                        tree_map.insert(key, CommittedEntry { value, seq });
                    }
                    None => {
                        tree_map.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.overlay.lock().clear();
    }
}

fn induced_failure(induce: &AtomicU32) -> bool {
    induce
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

enum Anchor {
    Start,
    End,
    At { key: Vec<u8>, inclusive: bool },
}

/// Merge cursor over one tree's committed map and the owning transaction's
/// overlay. Maps are locked per step rather than held across calls, so
/// writes interleave freely with an open cursor.
struct MemCursor {
    shared: Arc<Shared>,
    overlay: Arc<Mutex<OverlayTrees>>,
    tree: TreeId,
    visible_step: u64,
    anchor: Anchor,
}

impl MemCursor {
    fn step_forward(&self, lower: Bound<Vec<u8>>) -> Option<TreeEntry> {
        let committed = self.shared.committed.lock();
        let overlay = self.overlay.lock();
        let cmap = committed.get(&self.tree);
        let omap = overlay.get(&self.tree);
        let mut lower = lower;
        loop {
            let range = (as_ref_bound(&lower), Bound::<&[u8]>::Unbounded);
            let c = cmap.and_then(|m| m.range::<[u8], _>(range).next());
            let o = omap.and_then(|m| m.range::<[u8], _>(range).next());
            match self.resolve(c, o) {
                Resolved::Entry(entry) => return Some(entry),
                Resolved::Skip(key) => lower = Bound::Excluded(key),
                Resolved::Exhausted => return None,
            }
        }
    }

    fn step_backward(&self, upper: Bound<Vec<u8>>) -> Option<TreeEntry> {
        let committed = self.shared.committed.lock();
        let overlay = self.overlay.lock();
        let cmap = committed.get(&self.tree);
        let omap = overlay.get(&self.tree);
        let mut upper = upper;
        loop {
            let range = (Bound::<&[u8]>::Unbounded, as_ref_bound(&upper));
            let c = cmap.and_then(|m| m.range::<[u8], _>(range).next_back());
            let o = omap.and_then(|m| m.range::<[u8], _>(range).next_back());
            match self.resolve_rev(c, o) {
                Resolved::Entry(entry) => return Some(entry),
                Resolved::Skip(key) => upper = Bound::Excluded(key),
                Resolved::Exhausted => return None,
            }
        }
    }

    /// Pick the smaller of the two frontier keys and apply overlay
    /// precedence and step visibility at it.
    fn resolve(
        &self,
        c: Option<(&Vec<u8>, &CommittedEntry)>,
        o: Option<(&Vec<u8>, &OverlayEntry)>,
    ) -> Resolved {
        let key = match (c, o) {
            (None, None) => return Resolved::Exhausted,
            (Some((ck, _)), None) => ck,
            (None, Some((ok, _))) => ok,
            (Some((ck, _)), Some((ok, _))) => ck.min(ok),
        };
        self.resolve_at(key, c, o)
    }

    fn resolve_rev(
        &self,
        c: Option<(&Vec<u8>, &CommittedEntry)>,
        o: Option<(&Vec<u8>, &OverlayEntry)>,
    ) -> Resolved {
        let key = match (c, o) {
            (None, None) => return Resolved::Exhausted,
            (Some((ck, _)), None) => ck,
            (None, Some((ok, _))) => ok,
            (Some((ck, _)), Some((ok, _))) => ck.max(ok),
        };
        self.resolve_at(key, c, o)
    }

    fn resolve_at(
        &self,
        key: &[u8],
        c: Option<(&Vec<u8>, &CommittedEntry)>,
        o: Option<(&Vec<u8>, &OverlayEntry)>,
    ) -> Resolved {
        let committed_here = c.filter(|(ck, _)| ck.as_slice() == key);
        let overlay_here = o.filter(|(ok, _)| ok.as_slice() == key);
        if let Some((_, entry)) = overlay_here {
            if entry.step <= self.visible_step {
                return match &entry.value {
                    Some(value) => Resolved::Entry(TreeEntry {
                        key: key.to_vec(),
                        value: value.clone(),
                    }),
                    None => Resolved::Skip(key.to_vec()),
                };
            }
            // Own write newer than the cursor's horizon: invisible, the
            // committed image (if any) stands in for it.
        }
        match committed_here {
            Some((_, entry)) => Resolved::Entry(TreeEntry {
                key: key.to_vec(),
                value: entry.value.clone(),
            }),
            None => Resolved::Skip(key.to_vec()),
        }
    }
}

enum Resolved {
    Entry(TreeEntry),
    Skip(Vec<u8>),
    Exhausted,
}

fn as_ref_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl TreeCursor for MemCursor {
    fn seek(&mut self, key: &[u8]) {
        self.anchor = Anchor::At {
            key: key.to_vec(),
            inclusive: true,
        };
    }

    fn next(&mut self) -> Result<Option<TreeEntry>> {
        let lower = match &self.anchor {
            Anchor::Start => Bound::Unbounded,
            Anchor::End => return Ok(None),
            Anchor::At { key, inclusive } => {
                if *inclusive {
                    Bound::Included(key.clone())
                } else {
                    Bound::Excluded(key.clone())
                }
            }
        };
        match self.step_forward(lower) {
            Some(entry) => {
                self.anchor = Anchor::At {
                    key: entry.key.clone(),
                    inclusive: false,
                };
                Ok(Some(entry))
            }
            None => {
                self.anchor = Anchor::End;
                Ok(None)
            }
        }
    }

    fn prev(&mut self) -> Result<Option<TreeEntry>> {
        let upper = match &self.anchor {
            Anchor::End => Bound::Unbounded,
            Anchor::Start => return Ok(None),
            Anchor::At { key, inclusive } => {
                if *inclusive {
                    Bound::Included(key.clone())
                } else {
                    Bound::Excluded(key.clone())
                }
            }
        };
        match self.step_backward(upper) {
            Some(entry) => {
                self.anchor = Anchor::At {
                    key: entry.key.clone(),
                    inclusive: false,
                };
                Ok(Some(entry))
            }
            None => {
                self.anchor = Anchor::Start;
                Ok(None)
            }
        }
    }
}
