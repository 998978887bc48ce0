//! # Groups and Group Indexes
//!
//! A group is the physical storage unit holding one root table and every
//! descendant, co-located in a single ordered tree by hierarchical key. A
//! group index is a secondary index over columns from tables along one
//! ancestor chain of the group, stored as a flattened join.
//!
//! Group membership and index lists are resolved through id-indexed lookups
//! on the schema arena; the only object-level references run upward
//! (child -> parent join), never downward.

use hashbrown::HashMap;

use crate::engine::TreeId;
use crate::schema::{IndexId, Schema, TableId};
use crate::types::FieldType;

/// Join semantics of a group index, declared leafward: `Right` preserves the
/// rootward side (ancestors with no indexed descendants appear as
/// placeholder entries), `Left` preserves the leafward side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct Group {
    id: super::GroupId,
    name: String,
    root: TableId,
    /// Preorder over the table tree; scan order within the tree follows it.
    tables: Vec<TableId>,
    by_ordinal: HashMap<u8, TableId>,
    indexes: Vec<IndexId>,
    tree: TreeId,
}

impl Group {
    pub(crate) fn new(id: super::GroupId, name: String, root: TableId, tree: TreeId) -> Self {
        Self {
            id,
            name,
            root,
            tables: Vec::new(),
            by_ordinal: HashMap::new(),
            indexes: Vec::new(),
            tree,
        }
    }

    pub fn id(&self) -> super::GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> TableId {
        self.root
    }

    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    pub fn table_by_ordinal(&self, ordinal: u8) -> Option<TableId> {
        self.by_ordinal.get(&ordinal).copied()
    }

    pub fn indexes(&self) -> &[IndexId] {
        &self.indexes
    }

    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub(crate) fn add_table(&mut self, table: TableId, ordinal: u8) {
        self.tables.push(table);
        self.by_ordinal.insert(ordinal, table);
    }

    pub(crate) fn add_index(&mut self, index: IndexId) {
        self.indexes.push(index);
    }
}

/// Authoring-time group index description.
#[derive(Debug, Clone)]
pub struct GroupIndexBuilder {
    name: String,
    columns: Vec<(String, String)>,
    join: JoinType,
    unique: bool,
}

impl GroupIndexBuilder {
    pub fn new(name: impl Into<String>, join: JoinType) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            join,
            unique: false,
        }
    }

    pub fn with_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push((table.into(), column.into()));
        self
    }

    /// Group indexes are never unique; requesting it is rejected at build.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    pub(crate) fn join(&self) -> JoinType {
        self.join
    }

    pub(crate) fn is_unique(&self) -> bool {
        self.unique
    }
}

/// One indexed column, resolved to a field position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub table: TableId,
    pub field: usize,
    pub field_type: FieldType,
}

/// A resolved group index. `branch` is the ancestor chain root -> leaf-most
/// table; every indexed column's table lies on it.
#[derive(Debug, Clone)]
pub struct GroupIndexDef {
    id: IndexId,
    name: String,
    group: super::GroupId,
    join: JoinType,
    columns: Vec<IndexColumn>,
    branch: Vec<TableId>,
    tree: TreeId,
}

impl GroupIndexDef {
    pub(crate) fn new(
        id: IndexId,
        name: String,
        group: super::GroupId,
        join: JoinType,
        columns: Vec<IndexColumn>,
        branch: Vec<TableId>,
        tree: TreeId,
    ) -> Self {
        Self {
            id,
            name,
            group,
            join,
            columns,
            branch,
            tree,
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> super::GroupId {
        self.group
    }

    pub fn join(&self) -> JoinType {
        self.join
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    /// Branch tables root -> leaf-most. Writes to any of them (or to a
    /// descendant of the leaf-most) can affect this index.
    pub fn branch(&self) -> &[TableId] {
        &self.branch
    }

    pub fn leaf_most(&self) -> TableId {
        self.branch[self.branch.len() - 1]
    }

    pub fn tree(&self) -> TreeId {
        self.tree
    }

    /// Scan-cost hint only: true when the index column sequence coincides
    /// with a prefix of the owning branch's hkey column chain, meaning the
    /// index's physical order already matches hkey order. Derived fresh from
    /// hkey segment metadata, never load-bearing for correctness.
    pub fn order_matches_hkey(&self, schema: &Schema) -> bool {
        // The logical column behind segment value j of table t is t's j-th
        // primary-key field, regardless of which row physically sourced it.
        let leaf = schema.table(self.leaf_most());
        let mut hkey_columns = Vec::new();
        for segment in &leaf.hkey_meta().segments {
            let owner = schema.table(segment.table);
            for j in 0..segment.fields.len() {
                hkey_columns.push((segment.table, owner.primary_key()[j]));
            }
        }
        if self.columns.len() > hkey_columns.len() {
            return false;
        }
        self.columns
            .iter()
            .zip(hkey_columns.iter())
            .all(|(col, (table, field))| col.table == *table && col.field == *field)
    }
}
