//! # Incremental Group-Index Maintenance
//!
//! Group index entries are derived rows: the branch tables flattened
//! leafward, keyed by the encoded index columns followed by the source
//! row's hkey, stored key-only. Maintenance keeps the index identical to
//! what a bulk rebuild over the same data would produce.
//!
//! ## Delta Plans
//!
//! For every (index, trigger table on the branch) pair a
//! [`MaintenancePlan`] is prepared once per schema version. Its scan is
//! the bulk-build plan narrowed to the trigger row's subtree, with the
//! trigger's own ancestors looked up and prepended so the flatten chain
//! has its parents:
//!
//! ```text
//! GroupScan(subtree of trigger)
//!     └─ AncestorLookup(branch[0..p], keep input)   when p > 0
//!         └─ Filter(branch tables)
//!             └─ Flatten chain root..leaf
//! ```
//!
//! The chain's final shape is the primary shape; its rows map 1:1 to
//! entries. Under a parent-preserving join the flatten at the trigger's
//! position also keeps its parent shape: those rows address the
//! trigger's immediate ancestor, whose placeholder entry must be removed
//! on insert and, when the trigger row was the last sibling, re-created
//! on delete. Placeholder entry keys encode NULL for every column of a
//! table the source row does not span, so the key produced from a bare
//! ancestor row is byte-identical to the one bulk build derives from
//! `flattened(ancestor, NULL)`.
//!
//! Applying a delta plan is idempotent: entries are pure puts and
//! deletes of derived keys, so replaying a delta converges.

use eyre::{bail, Result};

use crate::adapter::StoreAdapter;
use crate::encoding::key;
use crate::hkey::HKey;
use crate::operator::{
    BindValue, Cursor, ExecContext, Operator, Row, RowTypeId, RowTypeRegistry, ScanBound,
};
use crate::schema::{GroupIndexDef, IndexId, JoinType, Schema, TableId};

/// Which side of a mutation the deltas serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// After the base row was written.
    Store,
    /// Before the base row is removed.
    Delete,
}

/// Entry key for `row` in `index`: the encoded index column values, NULL
/// for any column of a table outside the row's shape, followed by the
/// row's hkey bytes.
pub(crate) fn index_entry_key(
    registry: &RowTypeRegistry,
    index: &GroupIndexDef,
    row: &Row,
) -> Result<Vec<u8>> {
    let shape = registry.row_type(row.row_type());
    let view = row.view(registry)?;
    let mut entry = Vec::new();
    for col in index.columns() {
        match shape.field_position(col.table, col.field) {
            Some(pos) if !view.is_null(pos) => {
                key::encode_value(&view.get_value(pos)?, &mut entry);
            }
            _ => key::encode_null(&mut entry),
        }
    }
    entry.extend_from_slice(row.hkey().as_bytes());
    Ok(entry)
}

/// Delta plan for one (index, trigger) pair. Binding slot 0 carries the
/// trigger row's hkey; slot 0 of the sibling probe carries its parent's.
pub struct MaintenancePlan {
    index: IndexId,
    trigger: TableId,
    scan: Operator,
    primary: RowTypeId,
    /// Shape of the trigger's immediate-ancestor rows the scan also
    /// emits; present only under a parent-preserving join below the root.
    flattened_ancestor: Option<RowTypeId>,
    sibling_probe: Option<Operator>,
}

impl MaintenancePlan {
    pub fn index(&self) -> IndexId {
        self.index
    }

    pub fn trigger(&self) -> TableId {
        self.trigger
    }

    pub(crate) fn apply(
        &self,
        adapter: &StoreAdapter<'_>,
        registry: &RowTypeRegistry,
        kind: DeltaKind,
        trigger_hkey: &HKey,
        step: u64,
    ) -> Result<()> {
        let schema = adapter.schema();
        let index = schema.index(self.index);
        let tree = index.tree();
        let bindings = [BindValue::Key(trigger_hkey.clone())];
        let cx = ExecContext {
            adapter,
            registry,
            bindings: &bindings,
            visible_step: step,
        };
        let mut cursor = Cursor::open(&self.scan, cx)?;
        while let Some(row) = cursor.next()? {
            if row.row_type() == self.primary {
                let entry = index_entry_key(registry, index, &row)?;
                match kind {
                    DeltaKind::Store => {
                        adapter.txn().put(tree, &entry, &[], step)?;
                        adapter.stats().record_index_write();
                    }
                    DeltaKind::Delete => {
                        adapter.txn().delete(tree, &entry, step)?;
                        adapter.stats().record_index_delete();
                    }
                }
            } else if Some(row.row_type()) == self.flattened_ancestor {
                let entry = index_entry_key(registry, index, &row)?;
                match kind {
                    // The ancestor has a child now; its placeholder (if
                    // any) is stale. Removing an absent key is a no-op.
                    DeltaKind::Store => {
                        adapter.txn().delete(tree, &entry, step)?;
                    }
                    // The trigger row was its parent's only child exactly
                    // when the probe finds one row (the trigger itself,
                    // still present).
                    DeltaKind::Delete => {
                        if self.sibling_count(adapter, registry, trigger_hkey, step)? == 1 {
                            adapter.txn().put(tree, &entry, &[], step)?;
                        }
                    }
                }
            }
        }
        cursor.close();
        Ok(())
    }

    fn sibling_count(
        &self,
        adapter: &StoreAdapter<'_>,
        registry: &RowTypeRegistry,
        trigger_hkey: &HKey,
        step: u64,
    ) -> Result<usize> {
        let Some(probe) = &self.sibling_probe else {
            bail!(crate::error::Fault::InvalidPlan {
                reason: "ancestor delta without a sibling probe".into(),
            });
        };
        let depth = adapter.schema().table(self.trigger).depth();
        let parent_key = trigger_hkey.use_segments(depth);
        let bindings = [BindValue::Key(parent_key)];
        let cx = ExecContext {
            adapter,
            registry,
            bindings: &bindings,
            visible_step: step,
        };
        let mut cursor = Cursor::open(probe, cx)?;
        let mut count = 0usize;
        while cursor.next()?.is_some() {
            count += 1;
        }
        cursor.close();
        Ok(count)
    }
}

/// Bulk population plan: the full-group flatten, every final-shape row
/// becoming one entry.
pub struct BulkBuildPlan {
    index: IndexId,
    scan: Operator,
    primary: RowTypeId,
}

impl BulkBuildPlan {
    pub fn index(&self) -> IndexId {
        self.index
    }

    pub(crate) fn apply(
        &self,
        adapter: &StoreAdapter<'_>,
        registry: &RowTypeRegistry,
        step: u64,
    ) -> Result<u64> {
        let schema = adapter.schema();
        let index = schema.index(self.index);
        let tree = index.tree();
        let bindings: [BindValue; 0] = [];
        let cx = ExecContext {
            adapter,
            registry,
            bindings: &bindings,
            visible_step: step,
        };
        let mut cursor = Cursor::open(&self.scan, cx)?;
        let mut written = 0u64;
        while let Some(row) = cursor.next()? {
            if row.row_type() == self.primary {
                let entry = index_entry_key(registry, index, &row)?;
                adapter.txn().put(tree, &entry, &[], step)?;
                adapter.stats().record_index_write();
                written += 1;
            }
        }
        cursor.close();
        Ok(written)
    }
}

/// The flatten chain over an index's branch, shared by delta and bulk
/// plans. Returns the chained operator, the final shape, and the shape
/// of each intermediate flatten output (`shapes[i]` spans branch[0..=i]).
fn flatten_chain(
    schema: &Schema,
    registry: &mut RowTypeRegistry,
    index: &GroupIndexDef,
    mut input: Operator,
    keep_parent_at: Option<usize>,
) -> (Operator, Vec<RowTypeId>) {
    let branch = index.branch();
    let parent_preserving = index.join() == JoinType::Right;
    let mut shapes = Vec::with_capacity(branch.len());
    shapes.push(registry.table_type(branch[0]));
    for (i, &child) in branch.iter().enumerate().skip(1) {
        let parent = shapes[i - 1];
        let output = registry.flatten_type(schema, parent, child);
        input = Operator::Flatten {
            input: Box::new(input),
            parent,
            child,
            output,
            parent_preserving,
            keep_parent: keep_parent_at == Some(i),
        };
        shapes.push(output);
    }
    (input, shapes)
}

fn branch_filter(registry: &RowTypeRegistry, index: &GroupIndexDef, input: Operator) -> Operator {
    Operator::Filter {
        input: Box::new(input),
        keep: index
            .branch()
            .iter()
            .map(|&t| registry.table_type(t))
            .collect(),
    }
}

pub(crate) fn build_maintenance_plan(
    schema: &Schema,
    registry: &mut RowTypeRegistry,
    index: &GroupIndexDef,
    trigger_pos: usize,
) -> MaintenancePlan {
    let branch = index.branch();
    let trigger = branch[trigger_pos];
    let parent_preserving = index.join() == JoinType::Right;
    let ancestor_handling = parent_preserving && trigger_pos > 0;

    let mut input = Operator::GroupScan {
        group: index.group(),
        bound: ScanBound::SubtreeAt(0),
    };
    if trigger_pos > 0 {
        input = Operator::AncestorLookup {
            input: Box::new(input),
            ancestors: branch[..trigger_pos].to_vec(),
            for_tables: vec![trigger],
            keep_input: true,
        };
    }
    input = branch_filter(registry, index, input);
    let keep_parent_at = ancestor_handling.then_some(trigger_pos);
    let (scan, shapes) = flatten_chain(schema, registry, index, input, keep_parent_at);

    let sibling_probe = ancestor_handling.then(|| Operator::Limit {
        input: Box::new(Operator::Filter {
            input: Box::new(Operator::GroupScan {
                group: index.group(),
                bound: ScanBound::SubtreeAt(0),
            }),
            keep: vec![registry.table_type(trigger)],
        }),
        limit: 2,
    });

    MaintenancePlan {
        index: index.id(),
        trigger,
        scan,
        primary: shapes[branch.len() - 1],
        flattened_ancestor: ancestor_handling.then(|| shapes[trigger_pos - 1]),
        sibling_probe,
    }
}

pub(crate) fn build_bulk_plan(
    schema: &Schema,
    registry: &mut RowTypeRegistry,
    index: &GroupIndexDef,
) -> BulkBuildPlan {
    let input = branch_filter(
        registry,
        index,
        Operator::GroupScan {
            group: index.group(),
            bound: ScanBound::FullGroup,
        },
    );
    let (scan, shapes) = flatten_chain(schema, registry, index, input, None);
    BulkBuildPlan {
        index: index.id(),
        scan,
        primary: shapes[index.branch().len() - 1],
    }
}
