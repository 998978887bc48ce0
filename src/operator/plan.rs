//! # Operator Plans and Their Executors
//!
//! A plan is an [`Operator`] tree describing what to produce; opening it
//! builds a matching executor tree that pulls rows Volcano-style, one
//! `next()` at a time. Plans are immutable and shareable across
//! executions; all runtime state lives in the executors, and all runtime
//! inputs arrive through [`ExecContext`] bindings.
//!
//! ## Operators
//!
//! | Operator         | Produces                                          |
//! |------------------|---------------------------------------------------|
//! | `GroupScan`      | every row in a group range, preorder              |
//! | `IndexScan`      | index-shaped rows decoded from entry keys         |
//! | `BranchLookup`   | base rows addressed by the input rows' hkeys      |
//! | `AncestorLookup` | ancestor rows, rootmost first, before the input   |
//! | `Flatten`        | parent and child rows joined into one shape       |
//! | `Filter`         | input rows of the kept shapes                     |
//! | `Limit`          | a prefix of the input                             |
//! | `Sort`           | the input reordered by encoded sort keys          |
//!
//! `GroupScan` interleaves every table of the group in hkey order; the
//! stream is exactly the physical tree order, which is what `Flatten`'s
//! single-pass pairing relies on.
//!
//! Structural problems surface as [`Fault::InvalidPlan`] when the plan is
//! opened, never mid-stream.

use std::collections::VecDeque;
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;

use crate::adapter::{ExchangeGuard, StoreAdapter};
use crate::encoding::key;
use crate::engine::TreeCursor;
use crate::error::Fault;
use crate::hkey::{HKey, SUBTREE_END};
use crate::operator::row::{flatten_rows, Row, RowTypeId, RowTypeRegistry};
use crate::rowdata::{RowBuilder, RowData};
use crate::schema::{GroupId, IndexId, Schema, TableId};
use crate::types::Value;

/// Runtime parameter for a plan slot.
#[derive(Debug, Clone)]
pub enum BindValue {
    Key(HKey),
    Value(Value),
}

/// Key range of a [`Operator::GroupScan`].
#[derive(Debug, Clone)]
pub enum ScanBound {
    /// The whole group tree.
    FullGroup,
    /// The subtree rooted at the hkey bound to the slot: the row itself
    /// plus all its descendants.
    SubtreeAt(usize),
    /// From the hkey bound to `lo` through the end of the subtree of the
    /// hkey bound to `hi`.
    Range { lo: usize, hi: usize },
}

/// Bounds over a group index's column prefix. `None` means unbounded on
/// that side. An exclusive lower bound skips the entire prefix; an
/// inclusive upper bound covers it.
#[derive(Debug, Clone, Default)]
pub struct IndexRange {
    pub lo: Option<Vec<Value>>,
    pub hi: Option<Vec<Value>>,
    pub lo_inclusive: bool,
    pub hi_inclusive: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub field: usize,
    pub descending: bool,
}

#[derive(Clone)]
pub enum Operator {
    GroupScan {
        group: GroupId,
        bound: ScanBound,
    },
    IndexScan {
        index: IndexId,
        range: IndexRange,
        reverse: bool,
    },
    BranchLookup {
        input: Box<Operator>,
        target: TableId,
        keep_input: bool,
    },
    AncestorLookup {
        input: Box<Operator>,
        /// Rootmost first; emitted in this order ahead of the input row.
        ancestors: Vec<TableId>,
        /// Only rows of these tables trigger lookups; others pass through.
        for_tables: Vec<TableId>,
        keep_input: bool,
    },
    Flatten {
        input: Box<Operator>,
        parent: RowTypeId,
        child: TableId,
        output: RowTypeId,
        /// Emit `flattened(parent, NULL)` for a parent with no children.
        parent_preserving: bool,
        /// Also emit each parent-shaped row itself.
        keep_parent: bool,
    },
    Filter {
        input: Box<Operator>,
        keep: Vec<RowTypeId>,
    },
    Limit {
        input: Box<Operator>,
        limit: usize,
    },
    Sort {
        input: Box<Operator>,
        keys: Vec<SortKey>,
    },
}

impl Operator {
    /// Structural validation, run once when a cursor opens over the plan.
    pub fn validate(&self, schema: &Schema, registry: &RowTypeRegistry) -> Result<()> {
        match self {
            Operator::GroupScan { group, .. } => {
                if group.0 as usize >= schema.groups().len() {
                    bail!(Fault::InvalidPlan {
                        reason: format!("group scan over unknown group {}", group.0),
                    });
                }
            }
            Operator::IndexScan { index, range, .. } => {
                if index.0 as usize >= schema.indexes().len() {
                    bail!(Fault::InvalidPlan {
                        reason: format!("index scan over unknown index {}", index.0),
                    });
                }
                let columns = schema.index(*index).columns().len();
                for bound in [&range.lo, &range.hi].into_iter().flatten() {
                    if bound.len() > columns {
                        bail!(Fault::InvalidPlan {
                            reason: format!(
                                "index range binds {} values over {columns} columns",
                                bound.len()
                            ),
                        });
                    }
                }
            }
            Operator::BranchLookup { input, .. } => input.validate(schema, registry)?,
            Operator::AncestorLookup {
                input,
                ancestors,
                for_tables,
                ..
            } => {
                if ancestors.is_empty() || for_tables.is_empty() {
                    bail!(Fault::InvalidPlan {
                        reason: "ancestor lookup needs ancestors and trigger tables".into(),
                    });
                }
                input.validate(schema, registry)?;
            }
            Operator::Flatten {
                input,
                parent,
                child,
                output,
                ..
            } => {
                let parent_width = registry.row_type(*parent).layout().field_count();
                let child_width = schema.table(*child).fields().len();
                let output_width = registry.row_type(*output).layout().field_count();
                if parent_width + child_width != output_width {
                    bail!(Fault::InvalidPlan {
                        reason: format!(
                            "flatten output has {output_width} fields, expected \
                             {parent_width} + {child_width}"
                        ),
                    });
                }
                input.validate(schema, registry)?;
            }
            Operator::Filter { input, keep } => {
                if keep.is_empty() {
                    bail!(Fault::InvalidPlan {
                        reason: "filter keeps no row shapes".into(),
                    });
                }
                input.validate(schema, registry)?;
            }
            Operator::Limit { input, .. } => input.validate(schema, registry)?,
            Operator::Sort { input, keys } => {
                if keys.is_empty() {
                    bail!(Fault::InvalidPlan {
                        reason: "sort has no keys".into(),
                    });
                }
                input.validate(schema, registry)?;
            }
        }
        Ok(())
    }
}

/// Everything an executor tree needs at runtime. Copyable; executors
/// capture it at open.
#[derive(Clone, Copy)]
pub struct ExecContext<'e> {
    pub adapter: &'e StoreAdapter<'e>,
    pub registry: &'e RowTypeRegistry,
    pub bindings: &'e [BindValue],
    /// Writes tagged with a later step are invisible to this execution.
    pub visible_step: u64,
}

impl<'e> ExecContext<'e> {
    fn bind_key(&self, slot: usize) -> Result<&'e HKey> {
        match self.bindings.get(slot) {
            Some(BindValue::Key(hkey)) => Ok(hkey),
            Some(BindValue::Value(_)) => bail!(Fault::InvalidPlan {
                reason: format!("binding slot {slot} holds a value, expected a key"),
            }),
            None => bail!(Fault::InvalidPlan {
                reason: format!("binding slot {slot} is unbound"),
            }),
        }
    }
}

pub(crate) trait Executor<'e> {
    fn next(&mut self) -> Result<Option<Row>>;
}

pub(crate) fn open<'e>(
    op: &'e Operator,
    cx: ExecContext<'e>,
) -> Result<Box<dyn Executor<'e> + 'e>> {
    Ok(match op {
        Operator::GroupScan { group, bound } => Box::new(GroupScanExec::open(cx, *group, bound)?),
        Operator::IndexScan {
            index,
            range,
            reverse,
        } => Box::new(IndexScanExec::open(cx, *index, range, *reverse)?),
        Operator::BranchLookup {
            input,
            target,
            keep_input,
        } => Box::new(BranchLookupExec {
            cx,
            input: open(input, cx)?,
            target: *target,
            keep_input: *keep_input,
            queued: VecDeque::new(),
        }),
        Operator::AncestorLookup {
            input,
            ancestors,
            for_tables,
            keep_input,
        } => Box::new(AncestorLookupExec {
            cx,
            input: open(input, cx)?,
            ancestors,
            for_tables,
            keep_input: *keep_input,
            queued: VecDeque::new(),
            last_emitted: HashMap::new(),
        }),
        Operator::Flatten {
            input,
            parent,
            child,
            output,
            parent_preserving,
            keep_parent,
        } => Box::new(FlattenExec {
            cx,
            input: open(input, cx)?,
            parent_type: *parent,
            child_type: cx.registry.table_type(*child),
            output: *output,
            parent_preserving: *parent_preserving,
            keep_parent: *keep_parent,
            current: None,
            matched: false,
            queued: VecDeque::new(),
            input_done: false,
        }),
        Operator::Filter { input, keep } => Box::new(FilterExec {
            input: open(input, cx)?,
            keep,
        }),
        Operator::Limit { input, limit } => Box::new(LimitExec {
            input: open(input, cx)?,
            remaining: *limit,
        }),
        Operator::Sort { input, keys } => Box::new(SortExec {
            cx,
            input: Some(open(input, cx)?),
            keys,
            sorted: None,
        }),
    })
}

// ============================================================================
// GroupScan
// ============================================================================

struct GroupScanExec<'e> {
    cx: ExecContext<'e>,
    group: GroupId,
    cursor: Box<dyn TreeCursor>,
    /// Exclusive end key held in the exchange's key buffer.
    end: Option<ExchangeGuard<'e>>,
    done: bool,
}

impl<'e> GroupScanExec<'e> {
    fn open(cx: ExecContext<'e>, group: GroupId, bound: &ScanBound) -> Result<Self> {
        let schema = cx.adapter.schema();
        let tree = schema.group(group).tree();
        let mut cursor = cx.adapter.txn().open_cursor(tree, cx.visible_step)?;
        let end = match bound {
            ScanBound::FullGroup => {
                cursor.seek(&[]);
                None
            }
            ScanBound::SubtreeAt(slot) => {
                let hkey = cx.bind_key(*slot)?;
                cursor.seek(hkey.as_bytes());
                let mut exchange = cx.adapter.session().exchanges().take()?;
                exchange.key.extend_from_slice(hkey.as_bytes());
                exchange.key.push(SUBTREE_END);
                Some(exchange)
            }
            ScanBound::Range { lo, hi } => {
                let lo = cx.bind_key(*lo)?;
                let hi = cx.bind_key(*hi)?;
                cursor.seek(lo.as_bytes());
                let mut exchange = cx.adapter.session().exchanges().take()?;
                exchange.key.extend_from_slice(hi.as_bytes());
                exchange.key.push(SUBTREE_END);
                Some(exchange)
            }
        };
        Ok(Self {
            cx,
            group,
            cursor,
            end,
            done: false,
        })
    }
}

impl<'e> Executor<'e> for GroupScanExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let Some(entry) = self.cursor.next()? else {
            self.done = true;
            return Ok(None);
        };
        if let Some(end) = &self.end {
            if entry.key.as_slice() >= end.key.as_slice() {
                self.done = true;
                return Ok(None);
            }
        }
        let schema = self.cx.adapter.schema();
        let group = schema.group(self.group);
        let hkey = HKey::from_bytes(schema, group, entry.key)?;
        let Some(table) = hkey.leaf_ordinal().and_then(|o| group.table_by_ordinal(o)) else {
            bail!(Fault::CorruptRow {
                reason: format!("empty key in group {}", group.name()),
            });
        };
        let data = Arc::new(RowData::from_bytes(entry.value)?);
        Ok(Some(Row::new(
            self.cx.registry.table_type(table),
            hkey,
            data,
        )))
    }
}

// ============================================================================
// IndexScan
// ============================================================================

struct IndexScanExec<'e> {
    cx: ExecContext<'e>,
    index: IndexId,
    row_type: RowTypeId,
    cursor: Box<dyn TreeCursor>,
    /// Inclusive start and exclusive end, each in an exchange key buffer.
    start: Option<ExchangeGuard<'e>>,
    end: Option<ExchangeGuard<'e>>,
    reverse: bool,
    done: bool,
}

impl<'e> IndexScanExec<'e> {
    fn open(
        cx: ExecContext<'e>,
        index_id: IndexId,
        range: &IndexRange,
        reverse: bool,
    ) -> Result<Self> {
        let schema = cx.adapter.schema();
        let index = schema.index(index_id);
        let Some(row_type) = cx.registry.index_row_type(index_id) else {
            bail!(Fault::InvalidPlan {
                reason: format!("no row shape registered for index {}", index.name()),
            });
        };
        let mut cursor = cx.adapter.txn().open_cursor(index.tree(), cx.visible_step)?;

        // Normalize both bounds to [start, end). Every value encoding
        // begins below the 0xFF sentinel, so appending it turns a column
        // prefix into the end of that prefix's range.
        let start = match &range.lo {
            Some(values) => {
                let mut exchange = cx.adapter.session().exchanges().take()?;
                for value in values {
                    key::encode_value(value, &mut exchange.key);
                }
                if !range.lo_inclusive {
                    exchange.key.push(SUBTREE_END);
                }
                Some(exchange)
            }
            None => None,
        };
        let end = match &range.hi {
            Some(values) => {
                let mut exchange = cx.adapter.session().exchanges().take()?;
                for value in values {
                    key::encode_value(value, &mut exchange.key);
                }
                if range.hi_inclusive {
                    exchange.key.push(SUBTREE_END);
                }
                Some(exchange)
            }
            None => None,
        };

        if reverse {
            match &end {
                Some(end) => cursor.seek(&end.key),
                // Position past every key so prev() starts at the tail.
                None => cursor.seek(&[SUBTREE_END]),
            }
        } else {
            match &start {
                Some(start) => cursor.seek(&start.key),
                None => cursor.seek(&[]),
            }
        }
        Ok(Self {
            cx,
            index: index_id,
            row_type,
            cursor,
            start,
            end,
            reverse,
            done: false,
        })
    }

    fn decode(&self, entry_key: &[u8]) -> Result<Row> {
        let schema = self.cx.adapter.schema();
        let index = schema.index(self.index);
        let layout = self.cx.registry.row_type(self.row_type).layout();
        let mut builder = RowBuilder::new(layout);
        let mut pos = 0usize;
        for (i, col) in index.columns().iter().enumerate() {
            let (value, consumed) = key::decode_value(&entry_key[pos..], &col.field_type)?;
            pos += consumed;
            match value {
                Value::Null => {
                    builder.put_null(i);
                }
                value => {
                    builder.put_value(i, &value)?;
                }
            }
        }
        let group = schema.group(index.group());
        let hkey = HKey::from_bytes(schema, group, entry_key[pos..].to_vec())?;
        Ok(Row::new(
            self.row_type,
            hkey,
            Arc::new(builder.build()?),
        ))
    }
}

impl<'e> Executor<'e> for IndexScanExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let entry = if self.reverse {
                self.cursor.prev()?
            } else {
                self.cursor.next()?
            };
            let Some(entry) = entry else {
                self.done = true;
                return Ok(None);
            };
            if self.reverse {
                if let Some(end) = &self.end {
                    if entry.key.as_slice() >= end.key.as_slice() {
                        continue;
                    }
                }
                if let Some(start) = &self.start {
                    if entry.key.as_slice() < start.key.as_slice() {
                        self.done = true;
                        return Ok(None);
                    }
                }
            } else if let Some(end) = &self.end {
                if entry.key.as_slice() >= end.key.as_slice() {
                    self.done = true;
                    return Ok(None);
                }
            }
            return self.decode(&entry.key).map(Some);
        }
    }
}

// ============================================================================
// BranchLookup
// ============================================================================

struct BranchLookupExec<'e> {
    cx: ExecContext<'e>,
    input: Box<dyn Executor<'e> + 'e>,
    target: TableId,
    keep_input: bool,
    queued: VecDeque<Row>,
}

impl<'e> Executor<'e> for BranchLookupExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.queued.pop_front() {
                return Ok(Some(row));
            }
            let Some(input) = self.input.next()? else {
                return Ok(None);
            };
            let depth = self.cx.adapter.schema().table(self.target).depth();
            if input.hkey().segment_count() > depth {
                let target_key = input.hkey().use_segments(depth + 1);
                if let Some(data) = self.cx.adapter.get_row(self.target, &target_key)? {
                    if self.keep_input {
                        self.queued.push_back(input.clone());
                    }
                    self.queued.push_back(Row::new(
                        self.cx.registry.table_type(self.target),
                        target_key,
                        Arc::new(data),
                    ));
                    continue;
                }
            }
            // Placeholder entries address an ancestor; there is no target
            // row beneath them to fetch.
            if self.keep_input {
                return Ok(Some(input));
            }
        }
    }
}

// ============================================================================
// AncestorLookup
// ============================================================================

struct AncestorLookupExec<'e> {
    cx: ExecContext<'e>,
    input: Box<dyn Executor<'e> + 'e>,
    ancestors: &'e [TableId],
    for_tables: &'e [TableId],
    keep_input: bool,
    queued: VecDeque<Row>,
    /// Last ancestor key emitted per level, to not re-emit the shared
    /// ancestors of consecutive siblings.
    last_emitted: HashMap<TableId, HKey>,
}

impl<'e> Executor<'e> for AncestorLookupExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.queued.pop_front() {
                return Ok(Some(row));
            }
            let Some(input) = self.input.next()? else {
                return Ok(None);
            };
            let table = self.cx.registry.table_of(input.row_type());
            if !table.is_some_and(|t| self.for_tables.contains(&t)) {
                return Ok(Some(input));
            }
            for &ancestor in self.ancestors {
                let depth = self.cx.adapter.schema().table(ancestor).depth();
                if input.hkey().segment_count() <= depth {
                    continue;
                }
                let ancestor_key = input.hkey().use_segments(depth + 1);
                if self.last_emitted.get(&ancestor) == Some(&ancestor_key) {
                    continue;
                }
                let Some(data) = self.cx.adapter.get_row(ancestor, &ancestor_key)? else {
                    bail!(Fault::CorruptRow {
                        reason: format!(
                            "missing ancestor row in table {}",
                            self.cx.adapter.schema().table(ancestor).name()
                        ),
                    });
                };
                self.last_emitted.insert(ancestor, ancestor_key.clone());
                self.queued.push_back(Row::new(
                    self.cx.registry.table_type(ancestor),
                    ancestor_key,
                    Arc::new(data),
                ));
            }
            if self.keep_input {
                self.queued.push_back(input);
            }
        }
    }
}

// ============================================================================
// Flatten
// ============================================================================

/// Single-pass pairing over a preorder stream: each parent-shaped row is
/// held until its children (which follow it immediately in hkey order)
/// have streamed past. Rows of other shapes pass through untouched, which
/// is what lets flattens chain.
struct FlattenExec<'e> {
    cx: ExecContext<'e>,
    input: Box<dyn Executor<'e> + 'e>,
    parent_type: RowTypeId,
    child_type: RowTypeId,
    output: RowTypeId,
    parent_preserving: bool,
    keep_parent: bool,
    current: Option<Row>,
    matched: bool,
    queued: VecDeque<Row>,
    input_done: bool,
}

impl FlattenExec<'_> {
    /// Release the held parent; childless parents become
    /// `flattened(parent, NULL)` under a parent-preserving join.
    fn flush_current(&mut self) -> Result<()> {
        if let Some(parent) = self.current.take() {
            if self.parent_preserving && !self.matched {
                self.queued.push_back(flatten_rows(
                    self.cx.registry,
                    self.output,
                    &parent,
                    None,
                )?);
            }
        }
        self.matched = false;
        Ok(())
    }
}

impl<'e> Executor<'e> for FlattenExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.queued.pop_front() {
                return Ok(Some(row));
            }
            if self.input_done {
                return Ok(None);
            }
            match self.input.next()? {
                None => {
                    self.input_done = true;
                    self.flush_current()?;
                }
                Some(row) if row.row_type() == self.parent_type => {
                    self.flush_current()?;
                    if self.keep_parent {
                        self.queued.push_back(row.clone());
                    }
                    self.current = Some(row);
                }
                Some(row) if row.row_type() == self.child_type => {
                    match &self.current {
                        Some(parent) if parent.hkey().prefix_of(row.hkey()) => {
                            self.matched = true;
                            let flattened = flatten_rows(
                                self.cx.registry,
                                self.output,
                                parent,
                                Some(&row),
                            )?;
                            self.queued.push_back(flattened);
                        }
                        // Child outside the held parent's subtree: not
                        // ours to pair, hand it on.
                        _ => self.queued.push_back(row),
                    }
                }
                Some(row) => self.queued.push_back(row),
            }
        }
    }
}

// ============================================================================
// Filter / Limit / Sort
// ============================================================================

struct FilterExec<'e> {
    input: Box<dyn Executor<'e> + 'e>,
    keep: &'e [RowTypeId],
}

impl<'e> Executor<'e> for FilterExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.keep.contains(&row.row_type()) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct LimitExec<'e> {
    input: Box<dyn Executor<'e> + 'e>,
    remaining: usize,
}

impl<'e> Executor<'e> for LimitExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.input.next()? {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => {
                self.remaining = 0;
                Ok(None)
            }
        }
    }
}

struct SortExec<'e> {
    cx: ExecContext<'e>,
    input: Option<Box<dyn Executor<'e> + 'e>>,
    keys: &'e [SortKey],
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl SortExec<'_> {
    fn sort_key(&self, row: &Row) -> Result<Vec<u8>> {
        let view = row.view(self.cx.registry)?;
        let mut bytes = Vec::new();
        for sort_key in self.keys {
            let at = bytes.len();
            key::encode_value(&view.get_value(sort_key.field)?, &mut bytes);
            if sort_key.descending {
                for b in &mut bytes[at..] {
                    *b = !*b;
                }
            }
        }
        Ok(bytes)
    }
}

impl<'e> Executor<'e> for SortExec<'e> {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.sorted.is_none() {
            let Some(mut input) = self.input.take() else {
                return Ok(None);
            };
            let mut rows = Vec::new();
            while let Some(row) = input.next()? {
                let sort_key = self.sort_key(&row)?;
                rows.push((sort_key, row));
            }
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            self.sorted = Some(
                rows.into_iter()
                    .map(|(_, row)| row)
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next))
    }
}
