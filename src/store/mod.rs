//! # Operator Store
//!
//! The top of the tier: [`OperatorStore`] owns the engine, the current
//! schema, the plan cache, and store-wide statistics. All work happens
//! inside [`OperatorStore::transactionally`], which hands the body a
//! [`TxnContext`] scoped to one engine transaction and retries the whole
//! body on transaction conflicts, up to the configured attempt budget.
//!
//! ## Mutations
//!
//! Every mutation runs under its own update step and keeps the group
//! indexes synchronized around the base-row change:
//!
//! - `write_row`: base row first, then `Store` deltas (the delta scan
//!   must see the new row)
//! - `delete_row`: `Delete` deltas first while the row is still in
//!   place, then the base delete
//! - `update_row`: locate exactly one row through the locator prefix,
//!   `Delete` deltas from the stored image, the physical update, then
//!   `Store` deltas from the new image
//!
//! ## Schema Swaps
//!
//! The schema sits behind `RwLock<Arc<Schema>>`. Replacing it bumps the
//! version; the plan cache rebuilds lazily on the next transaction and
//! running transactions finish against the version they started with.

pub mod maintenance;
pub mod plan_cache;

pub use maintenance::DeltaKind;
pub use plan_cache::{PlanCache, PlanSet};

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};

use crate::adapter::{Session, StoreAdapter, StoreStats};
use crate::config::StoreConfig;
use crate::engine::{TreeStore, TxnGuard};
use crate::error::{is_conflict, Fault};
use crate::hkey::HKey;
use crate::operator::{
    BindValue, Cursor, ExecContext, Operator, RowTypeRegistry, ScanBound,
};
use crate::rowdata::{RowData, RowView};
use crate::schema::{IndexId, Schema, TableId};
use crate::LOG_TARGET;

pub struct OperatorStore<S: TreeStore> {
    engine: S,
    schema: RwLock<Arc<Schema>>,
    cache: PlanCache,
    config: StoreConfig,
    stats: StoreStats,
    /// Indexes whose population is deferred; maintenance skips them
    /// until [`OperatorStore::build_deferred_indexes`] runs.
    deferred: Mutex<HashSet<IndexId>>,
}

impl<S: TreeStore> OperatorStore<S> {
    pub fn new(engine: S, schema: Schema, config: StoreConfig) -> Self {
        Self {
            engine,
            schema: RwLock::new(Arc::new(schema)),
            cache: PlanCache::new(),
            config,
            stats: StoreStats::default(),
            deferred: Mutex::new(HashSet::new()),
        }
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema.read())
    }

    /// Swap in a new schema. In-flight transactions keep the old one.
    pub fn replace_schema(&self, schema: Schema) {
        log::info!(
            target: LOG_TARGET,
            "schema {} replaced, now version {}",
            schema.name(),
            schema.version()
        );
        *self.schema.write() = Arc::new(schema);
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn engine(&self) -> &S {
        &self.engine
    }

    /// Run `body` in a transaction, committing on success. A conflict at
    /// commit or inside the body rolls back and reruns the body, up to
    /// the configured number of retries.
    pub fn transactionally<T>(
        &self,
        session: &Session,
        mut body: impl FnMut(&TxnContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let schema = self.schema();
        let plans = self.cache.plans_for(&schema);
        let retries = self.config.txn_retries();
        let mut attempt = 0usize;
        loop {
            let guard = TxnGuard::begin(&self.engine)?;
            let cx = TxnContext {
                adapter: StoreAdapter::new(&schema, session, guard.txn(), &self.stats),
                plans: &plans,
                deferred: &self.deferred,
            };
            match body(&cx) {
                Ok(value) => {
                    let row_deltas = cx.adapter.take_row_deltas();
                    drop(cx);
                    match guard.commit() {
                        Ok(()) => {
                            self.stats.apply_row_deltas(&row_deltas);
                            return Ok(value);
                        }
                        Err(err) if is_conflict(&err) => {
                            self.note_conflict(&mut attempt, retries)?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(err) if is_conflict(&err) => {
                    drop(cx);
                    self.note_conflict(&mut attempt, retries)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn note_conflict(&self, attempt: &mut usize, retries: usize) -> Result<()> {
        self.stats.record_retry();
        if *attempt >= retries {
            bail!(Fault::Store {
                reason: format!("transaction conflict after {} attempts", *attempt + 1),
            });
        }
        *attempt += 1;
        log::debug!(
            target: LOG_TARGET,
            "transaction conflict, retrying (attempt {} of {})",
            *attempt + 1,
            retries + 1
        );
        Ok(())
    }

    /// Populate the named group indexes. With `defer` the work is only
    /// recorded; maintenance skips deferred indexes until
    /// [`Self::build_deferred_indexes`] runs.
    pub fn build_indexes(
        &self,
        session: &Session,
        names: &[&str],
        defer: bool,
    ) -> Result<()> {
        let schema = self.schema();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(schema.index_named(name)?.id());
        }
        if defer {
            log::info!(target: LOG_TARGET, "deferred build of {} indexes", ids.len());
            self.deferred.lock().extend(ids);
            return Ok(());
        }
        self.build_index_ids(session, &ids)
    }

    pub fn build_deferred_indexes(&self, session: &Session) -> Result<()> {
        let ids: Vec<IndexId> = self.deferred.lock().iter().copied().collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.build_index_ids(session, &ids)?;
        let mut deferred = self.deferred.lock();
        for id in &ids {
            deferred.remove(id);
        }
        Ok(())
    }

    fn build_index_ids(&self, session: &Session, ids: &[IndexId]) -> Result<()> {
        let schema = self.schema();
        self.transactionally(session, |cx| {
            for &id in ids {
                let written = cx.build_index(id)?;
                log::info!(
                    target: LOG_TARGET,
                    "built index {} with {written} entries",
                    schema.index(id).name()
                );
            }
            Ok(())
        })
    }
}

/// One transaction's view of the store: the adapter, the prepared plans,
/// and the mutation operations that keep indexes synchronized.
pub struct TxnContext<'t> {
    adapter: StoreAdapter<'t>,
    plans: &'t Arc<PlanSet>,
    deferred: &'t Mutex<HashSet<IndexId>>,
}

impl<'t> TxnContext<'t> {
    pub fn adapter(&self) -> &StoreAdapter<'t> {
        &self.adapter
    }

    pub fn registry(&self) -> &RowTypeRegistry {
        self.plans.registry()
    }

    pub fn plans(&self) -> &PlanSet {
        self.plans
    }

    /// Open a cursor over an ad-hoc plan. The cursor sees committed data
    /// plus this transaction's completed statements.
    pub fn open_cursor<'c>(
        &'c self,
        plan: &'c Operator,
        bindings: &'c [BindValue],
    ) -> Result<Cursor<'c>> {
        let cx = ExecContext {
            adapter: &self.adapter,
            registry: self.plans.registry(),
            bindings,
            visible_step: self.adapter.session().visible_step(),
        };
        Cursor::open(plan, cx)
    }

    /// Insert a base row and bring every affected group index up to date.
    pub fn write_row(&self, table: TableId, data: &RowData) -> Result<HKey> {
        let step = self.adapter.session().enter_update_step();
        let hkey = self.adapter.write_row(table, data, step.step())?;
        self.apply_index_deltas(DeltaKind::Store, table, &hkey, step.step())?;
        Ok(hkey)
    }

    /// Delete the row at `hkey`, deriving index deltas from the stored
    /// image before it goes away.
    pub fn delete_row(&self, table: TableId, hkey: &HKey) -> Result<RowData> {
        let step = self.adapter.session().enter_update_step();
        if self.adapter.get_row(table, hkey)?.is_none() {
            bail!(Fault::NoSuchRow);
        }
        self.apply_index_deltas(DeltaKind::Delete, table, hkey, step.step())?;
        self.adapter.delete_row(table, hkey, step.step())
    }

    /// Update exactly one row of `table` located through `locator`, a
    /// full hkey or a prefix from [`Self::locator_from_row`]. Zero
    /// matches and multiple matches are cardinality faults.
    pub fn update_row(
        &self,
        table: TableId,
        locator: &HKey,
        data: &RowData,
    ) -> Result<HKey> {
        let step = self.adapter.session().enter_update_step();
        let old_hkey = self.locate_single(table, locator, step.step())?;
        self.apply_index_deltas(DeltaKind::Delete, table, &old_hkey, step.step())?;
        let new_hkey = self
            .adapter
            .update_row(table, &old_hkey, data, step.step())?;
        self.apply_index_deltas(DeltaKind::Store, table, &new_hkey, step.step())?;
        Ok(new_hkey)
    }

    /// Locator prefix from a row image whose trailing key columns may be
    /// NULL or unbound: segments are encoded until the first missing key
    /// column, widening the match to that prefix's whole subtree. The
    /// cardinality check in [`Self::update_row`] keeps widening safe.
    pub fn locator_from_row(&self, table: TableId, data: &RowData) -> Result<HKey> {
        let def = self.adapter.schema().table(table);
        let view = RowView::new(data.as_bytes(), def.layout())?;
        let mut locator = HKey::new();
        for segment in &def.hkey_meta().segments {
            locator.extend_with_ordinal(segment.ordinal)?;
            for &field in &segment.fields {
                if view.is_null(field) {
                    return Ok(locator);
                }
                locator.extend_with_value(&view.get_value(field)?);
            }
        }
        Ok(locator)
    }

    /// Bulk-populate one index; returns the entry count.
    pub fn build_index(&self, index: IndexId) -> Result<u64> {
        let step = self.adapter.session().enter_update_step();
        let plan = self.plans.bulk(index)?;
        plan.apply(&self.adapter, self.plans.registry(), step.step())
    }

    fn locate_single(&self, table: TableId, locator: &HKey, step: u64) -> Result<HKey> {
        let plan = Operator::Limit {
            input: Box::new(Operator::Filter {
                input: Box::new(Operator::GroupScan {
                    group: self.adapter.schema().table(table).group(),
                    bound: ScanBound::SubtreeAt(0),
                }),
                keep: vec![self.plans.registry().table_type(table)],
            }),
            limit: 2,
        };
        let bindings = [BindValue::Key(locator.clone())];
        let cx = ExecContext {
            adapter: &self.adapter,
            registry: self.plans.registry(),
            bindings: &bindings,
            visible_step: step,
        };
        let mut cursor = Cursor::open(&plan, cx)?;
        let first = cursor.next()?;
        let second = cursor.next()?;
        cursor.close();
        match (first, second) {
            (Some(row), None) => Ok(row.hkey().clone()),
            (None, _) => bail!(Fault::NoRowsUpdated),
            (Some(_), Some(_)) => bail!(Fault::TooManyRowsUpdated { touched: 2 }),
        }
    }

    fn apply_index_deltas(
        &self,
        kind: DeltaKind,
        table: TableId,
        trigger_hkey: &HKey,
        step: u64,
    ) -> Result<()> {
        let schema = self.adapter.schema();
        for index in schema.affecting_indexes(table) {
            if self.deferred.lock().contains(&index.id()) {
                continue;
            }
            let plan = self.plans.maintenance(index.id(), table)?;
            plan.apply(&self.adapter, self.plans.registry(), kind, trigger_hkey, step)?;
        }
        Ok(())
    }
}
