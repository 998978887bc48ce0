//! # Store Adapter
//!
//! The bridge between typed rows and the ordered KV engine. A
//! [`StoreAdapter`] is scoped to one transaction and translates row-level
//! operations into tree operations:
//!
//! - base rows live in their group's tree under the row's hkey
//! - duplicate and missing-row checks happen here, as typed faults
//! - an update whose key columns changed relocates the row
//!
//! The adapter never touches group index trees; index deltas are planned
//! and applied a level up, which keeps this layer a pure base-row codec
//! over the engine.
//!
//! Engine errors that are not already typed faults are normalized to
//! [`Fault::Store`] so callers can classify everything that escapes.

pub mod exchange;
pub mod session;

pub use exchange::{Exchange, ExchangeGuard, ExchangePool};
pub use session::{Session, UpdateStepGuard};

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::engine::StoreTxn;
use crate::error::{fault_of, Fault};
use crate::hkey::HKey;
use crate::rowdata::{RowData, RowView};
use crate::schema::{Schema, TableId};

/// Approximate per-table row counts plus transaction retry accounting.
/// Counts are applied after commit, so readers see committed magnitudes
/// that may lag in-flight transactions.
#[derive(Default)]
pub struct StoreStats {
    rows: Mutex<HashMap<TableId, u64>>,
    retries: AtomicU64,
    index_entries_written: AtomicU64,
    index_entries_deleted: AtomicU64,
}

impl StoreStats {
    pub fn row_count(&self, table: TableId) -> u64 {
        self.rows.lock().get(&table).copied().unwrap_or(0)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn index_entries_written(&self) -> u64 {
        self.index_entries_written.load(Ordering::SeqCst)
    }

    pub fn index_entries_deleted(&self) -> u64 {
        self.index_entries_deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_index_write(&self) {
        self.index_entries_written.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_index_delete(&self) {
        self.index_entries_deleted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn apply_row_deltas(&self, deltas: &HashMap<TableId, i64>) {
        let mut rows = self.rows.lock();
        for (&table, &delta) in deltas {
            let count = rows.entry(table).or_insert(0);
            *count = count.saturating_add_signed(delta);
        }
    }
}

pub struct StoreAdapter<'t> {
    schema: &'t Schema,
    session: &'t Session,
    txn: &'t dyn StoreTxn,
    stats: &'t StoreStats,
    /// Row-count deltas of this transaction, folded into `stats` only
    /// after a successful commit.
    pending_rows: Mutex<HashMap<TableId, i64>>,
}

impl<'t> StoreAdapter<'t> {
    pub fn new(
        schema: &'t Schema,
        session: &'t Session,
        txn: &'t dyn StoreTxn,
        stats: &'t StoreStats,
    ) -> Self {
        Self {
            schema,
            session,
            txn,
            stats,
            pending_rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &'t Schema {
        self.schema
    }

    pub fn session(&self) -> &'t Session {
        self.session
    }

    pub fn txn(&self) -> &'t dyn StoreTxn {
        self.txn
    }

    pub fn stats(&self) -> &'t StoreStats {
        self.stats
    }

    /// Derive the row's hkey from its own field values.
    pub fn hkey_of(&self, table: TableId, data: &RowData) -> Result<HKey> {
        let def = self.schema.table(table);
        let view = RowView::new(data.as_bytes(), def.layout())?;
        HKey::from_row(&view, def.hkey_meta())
    }

    /// Insert a base row. Fails with [`Fault::DuplicateRow`] when a row
    /// already lives at the derived hkey.
    pub fn write_row(&self, table: TableId, data: &RowData, step: u64) -> Result<HKey> {
        let hkey = self.hkey_of(table, data)?;
        let tree = self.group_tree(table);
        if normalize(self.txn.get(tree, hkey.as_bytes()))?.is_some() {
            bail!(Fault::DuplicateRow {
                key: hex_key(hkey.as_bytes()),
            });
        }
        normalize(self.txn.put(tree, hkey.as_bytes(), data.as_bytes(), step))?;
        *self.pending_rows.lock().entry(table).or_insert(0) += 1;
        Ok(hkey)
    }

    pub fn get_row(&self, table: TableId, hkey: &HKey) -> Result<Option<RowData>> {
        let tree = self.group_tree(table);
        match normalize(self.txn.get(tree, hkey.as_bytes()))? {
            Some(bytes) => Ok(Some(RowData::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a base row, returning the stored image so index deltas can
    /// be derived from what the tree actually held.
    pub fn delete_row(&self, table: TableId, hkey: &HKey, step: u64) -> Result<RowData> {
        let tree = self.group_tree(table);
        let Some(bytes) = normalize(self.txn.get(tree, hkey.as_bytes()))? else {
            bail!(Fault::NoSuchRow);
        };
        normalize(self.txn.delete(tree, hkey.as_bytes(), step))?;
        *self.pending_rows.lock().entry(table).or_insert(0) -= 1;
        Ok(RowData::from_bytes(bytes)?)
    }

    /// Replace a base row. When the new image changes a key column the
    /// row relocates: delete at the old hkey, insert at the new one.
    pub fn update_row(
        &self,
        table: TableId,
        old_hkey: &HKey,
        data: &RowData,
        step: u64,
    ) -> Result<HKey> {
        let new_hkey = self.hkey_of(table, data)?;
        let tree = self.group_tree(table);
        if new_hkey != *old_hkey {
            if normalize(self.txn.get(tree, new_hkey.as_bytes()))?.is_some() {
                bail!(Fault::DuplicateRow {
                    key: hex_key(new_hkey.as_bytes()),
                });
            }
            normalize(self.txn.delete(tree, old_hkey.as_bytes(), step))?;
        }
        normalize(self.txn.put(tree, new_hkey.as_bytes(), data.as_bytes(), step))?;
        Ok(new_hkey)
    }

    /// Approximate committed row count; see [`StoreStats`].
    pub fn row_count(&self, table: TableId) -> u64 {
        self.stats.row_count(table)
    }

    pub(crate) fn take_row_deltas(&self) -> HashMap<TableId, i64> {
        std::mem::take(&mut self.pending_rows.lock())
    }

    fn group_tree(&self, table: TableId) -> crate::engine::TreeId {
        self.schema.group(self.schema.table(table).group()).tree()
    }
}

/// Engine errors keep their typed fault if they carry one, otherwise they
/// surface as [`Fault::Store`].
fn normalize<T>(result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if fault_of(&err).is_some() => Err(err),
        Err(err) => bail!(Fault::Store {
            reason: format!("{err:#}"),
        }),
    }
}

fn hex_key(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
