//! # Schema Module
//!
//! The schema arena this tier consumes: tables with parent joins, groups
//! with per-table ordinals, and group indexes with their branch chains.
//! Everything is resolved once by [`SchemaBuilder::build`] into id-indexed
//! vectors plus name lookup maps; cross-references are ids, and the only
//! object-level reference runs upward (child to parent join).
//!
//! A built `Schema` is immutable. Schema change means building a new one,
//! which receives a fresh version number; downstream caches key on that
//! version and swap wholesale.
//!
//! ## Build-Time Validation
//!
//! - declared charsets must be UTF-8, ASCII, or Latin-1 (fault names the
//!   offending column)
//! - every table needs a primary key; ordinals must fit one byte below the
//!   0xFF range sentinel
//! - a child's foreign key must cover the parent's entire hkey column chain
//!   with matching types ("hkey-complete" joins)
//! - group index columns must lie on one ancestor chain of one group
//! - unique group indexes are rejected

pub mod group;
pub mod table;

pub use group::{Group, GroupIndexBuilder, GroupIndexDef, IndexColumn, JoinType};
pub use table::{FieldDef, HKeyMeta, HKeySegment, ParentJoin, TableBuilder, TableDef};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;

use crate::engine::TreeId;
use crate::error::Fault;
use crate::rowdata::RowLayout;
use crate::types::{Charset, FieldType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub u32);

/// Largest assignable table ordinal; 0xFF is reserved as the subtree range
/// sentinel and 0 marks "unassigned".
const MAX_ORDINAL: u32 = 0xFE;

static SCHEMA_VERSION: AtomicU64 = AtomicU64::new(0);

pub struct SchemaBuilder {
    name: String,
    tables: Vec<TableBuilder>,
    indexes: Vec<GroupIndexBuilder>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn table(mut self, table: TableBuilder) -> Self {
        self.tables.push(table);
        self
    }

    pub fn group_index(mut self, index: GroupIndexBuilder) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(mut self) -> Result<Schema> {
        self.resolve_charsets()?;

        // Table ids by insertion order, then name lookup.
        let mut table_names: HashMap<String, TableId> = HashMap::new();
        for (i, tb) in self.tables.iter().enumerate() {
            let prior = table_names.insert(tb.name().to_string(), TableId(i as u32));
            ensure!(prior.is_none(), "duplicate table name {}", tb.name());
        }

        let mut tables = self.resolve_tables(&table_names)?;
        Self::link_children(&mut tables)?;
        let mut groups = Self::assign_groups(&mut tables)?;
        Self::compute_hkey_metas(&mut tables, &groups)?;
        let (indexes, index_names) =
            self.resolve_indexes(&tables, &table_names, &mut groups)?;

        Ok(Schema {
            version: SCHEMA_VERSION.fetch_add(1, Ordering::SeqCst) + 1,
            name: self.name,
            tables,
            groups,
            indexes,
            table_names,
            index_names,
        })
    }

    fn resolve_charsets(&mut self) -> Result<()> {
        let schema_name = self.name.clone();
        for tb in &mut self.tables {
            let table_name = tb.name().to_string();
            for field in tb.fields_mut() {
                let Some(declared) = field.declared_charset().map(str::to_string) else {
                    continue;
                };
                let column = format!("{schema_name}.{table_name}.{}", field.name());
                let FieldType::Varchar { max_len, .. } = field.field_type() else {
                    bail!("charset declared for non-varchar column {column}");
                };
                let Some(charset) = Charset::parse(&declared) else {
                    bail!(Fault::UnsupportedCharset {
                        column,
                        charset: declared,
                    });
                };
                field.set_field_type(FieldType::Varchar { max_len, charset });
            }
        }
        Ok(())
    }

    fn resolve_tables(&self, table_names: &HashMap<String, TableId>) -> Result<Vec<TableDef>> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for (i, tb) in self.tables.iter().enumerate() {
            let id = TableId(i as u32);
            ensure!(
                !tb.primary_key().is_empty(),
                "table {} has no primary key",
                tb.name()
            );
            let mut pk_fields = Vec::with_capacity(tb.primary_key().len());
            for pk in tb.primary_key() {
                let Some(pos) = tb.fields().iter().position(|f| f.name() == pk) else {
                    bail!("primary key column {pk} not found in table {}", tb.name());
                };
                pk_fields.push(pos);
            }
            let parent = match tb.parent() {
                None => None,
                Some((parent_name, fk_columns)) => {
                    let Some(&parent_id) = table_names.get(parent_name) else {
                        bail!(Fault::UnknownTable {
                            name: parent_name.to_string(),
                        });
                    };
                    let mut fk_fields = Vec::with_capacity(fk_columns.len());
                    for fk in fk_columns {
                        let Some(pos) = tb.fields().iter().position(|f| f.name() == fk) else {
                            bail!(
                                "foreign key column {fk} not found in table {}",
                                tb.name()
                            );
                        };
                        fk_fields.push(pos);
                    }
                    Some(ParentJoin {
                        parent: parent_id,
                        fk_fields,
                    })
                }
            };
            let layout = Arc::new(RowLayout::new(
                id.0,
                tb.name(),
                tb.fields().to_vec(),
            ));
            tables.push(TableDef::new(
                id,
                tb.name().to_string(),
                tb.fields().to_vec(),
                pk_fields,
                parent,
                layout,
            ));
        }
        Ok(tables)
    }

    fn link_children(tables: &mut [TableDef]) -> Result<()> {
        let joins: Vec<(TableId, Option<TableId>)> = tables
            .iter()
            .map(|t| (t.id(), t.parent_join().map(|j| j.parent)))
            .collect();
        for (child, parent) in joins {
            if let Some(parent) = parent {
                ensure!(parent != child, "table {} is its own parent", child.0);
                tables[parent.0 as usize].add_child(child);
            }
        }
        Ok(())
    }

    fn assign_groups(tables: &mut [TableDef]) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        let mut visited = vec![false; tables.len()];
        let roots: Vec<TableId> = tables
            .iter()
            .filter(|t| t.parent_join().is_none())
            .map(|t| t.id())
            .collect();

        for root in roots {
            let group_id = GroupId(groups.len() as u32);
            let mut group = Group::new(
                group_id,
                tables[root.0 as usize].name().to_string(),
                root,
                TreeId(groups.len() as u32),
            );
            let mut ordinal = 0u32;
            // Preorder over the table tree; scan order follows it.
            let mut stack = vec![(root, 0usize)];
            while let Some((id, depth)) = stack.pop() {
                ordinal += 1;
                ensure!(
                    ordinal <= MAX_ORDINAL,
                    "group {} exceeds {MAX_ORDINAL} tables",
                    group.name()
                );
                let table = &mut tables[id.0 as usize];
                table.place_in_group(group_id, ordinal as u8, depth);
                visited[id.0 as usize] = true;
                group.add_table(id, ordinal as u8);
                for &child in table.children().iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
            groups.push(group);
        }

        if let Some(idx) = visited.iter().position(|v| !v) {
            bail!(
                "table {} is unreachable from any group root (parent cycle?)",
                tables[idx].name()
            );
        }
        Ok(groups)
    }

    fn compute_hkey_metas(tables: &mut [TableDef], groups: &[Group]) -> Result<()> {
        for group in groups {
            // Preorder guarantees parents are computed before children.
            for &id in group.tables() {
                let table = &tables[id.0 as usize];
                let meta = match table.parent_join() {
                    None => HKeyMeta {
                        segments: vec![HKeySegment {
                            ordinal: table.ordinal(),
                            table: id,
                            fields: table.primary_key().to_vec(),
                        }],
                    },
                    Some(join) => {
                        let parent = &tables[join.parent.0 as usize];
                        let parent_meta = parent.hkey_meta();
                        let expected = parent_meta.column_count();
                        if join.fk_fields.len() != expected {
                            bail!(
                                "table {}: foreign key covers {} of the {} rootward \
                                 hkey columns of {}",
                                table.name(),
                                join.fk_fields.len(),
                                expected,
                                parent.name()
                            );
                        }
                        let mut segments = Vec::with_capacity(parent_meta.segments.len() + 1);
                        let mut fk_iter = join.fk_fields.iter();
                        for parent_segment in &parent_meta.segments {
                            let owner = &tables[parent_segment.table.0 as usize];
                            let mut fields = Vec::with_capacity(parent_segment.fields.len());
                            for (j, _) in parent_segment.fields.iter().enumerate() {
                                let &fk_pos = fk_iter.next().ok_or_else(|| {
                                    eyre::eyre!("foreign key arity mismatch")
                                })?;
                                let want =
                                    owner.field(owner.primary_key()[j]).field_type();
                                let got = table.field(fk_pos).field_type();
                                ensure!(
                                    want == got,
                                    "table {}: foreign key column {} has type {:?}, \
                                     but rootward key column is {:?}",
                                    table.name(),
                                    table.field(fk_pos).name(),
                                    got,
                                    want
                                );
                                fields.push(fk_pos);
                            }
                            segments.push(HKeySegment {
                                ordinal: parent_segment.ordinal,
                                table: parent_segment.table,
                                fields,
                            });
                        }
                        segments.push(HKeySegment {
                            ordinal: table.ordinal(),
                            table: id,
                            fields: table.primary_key().to_vec(),
                        });
                        HKeyMeta { segments }
                    }
                };
                tables[id.0 as usize].set_hkey_meta(meta);
            }
        }
        Ok(())
    }

    fn resolve_indexes(
        &self,
        tables: &[TableDef],
        table_names: &HashMap<String, TableId>,
        groups: &mut [Group],
    ) -> Result<(Vec<GroupIndexDef>, HashMap<String, IndexId>)> {
        let mut indexes = Vec::with_capacity(self.indexes.len());
        let mut index_names = HashMap::new();
        for (j, ib) in self.indexes.iter().enumerate() {
            if ib.is_unique() {
                bail!(Fault::UniqueGroupIndex {
                    index: ib.name().to_string(),
                });
            }
            ensure!(
                !ib.columns().is_empty(),
                "group index {} has no columns",
                ib.name()
            );
            let id = IndexId(j as u32);
            let prior = index_names.insert(ib.name().to_string(), id);
            ensure!(prior.is_none(), "duplicate index name {}", ib.name());

            let mut columns = Vec::with_capacity(ib.columns().len());
            for (table_name, column_name) in ib.columns() {
                let Some(&table_id) = table_names.get(table_name.as_str()) else {
                    bail!(Fault::UnknownTable {
                        name: table_name.clone(),
                    });
                };
                let table = &tables[table_id.0 as usize];
                let Some(field) = table.field_index(column_name) else {
                    bail!(
                        "column {column_name} not found in table {table_name} \
                         for index {}",
                        ib.name()
                    );
                };
                columns.push(IndexColumn {
                    table: table_id,
                    field,
                    field_type: table.field(field).field_type(),
                });
            }

            let group_id = tables[columns[0].table.0 as usize].group();
            ensure!(
                columns
                    .iter()
                    .all(|c| tables[c.table.0 as usize].group() == group_id),
                "group index {} spans multiple groups",
                ib.name()
            );

            // Leaf-most table is the deepest among the indexed columns;
            // every other column table must be one of its ancestors.
            let leaf = columns
                .iter()
                .map(|c| c.table)
                .max_by_key(|t| tables[t.0 as usize].depth())
                .ok_or_else(|| eyre::eyre!("group index {} has no columns", ib.name()))?;
            let mut branch = Vec::new();
            let mut cursor = Some(leaf);
            while let Some(t) = cursor {
                branch.push(t);
                cursor = tables[t.0 as usize].parent_join().map(|pj| pj.parent);
            }
            branch.reverse();
            for col in &columns {
                ensure!(
                    branch.contains(&col.table),
                    "group index {}: columns do not lie on one ancestor chain",
                    ib.name()
                );
            }

            let tree = TreeId((groups.len() + j) as u32);
            groups[group_id.0 as usize].add_index(id);
            indexes.push(GroupIndexDef::new(
                id,
                ib.name().to_string(),
                group_id,
                ib.join(),
                columns,
                branch,
                tree,
            ));
        }
        Ok((indexes, index_names))
    }
}

/// The immutable, id-indexed schema arena.
#[derive(Debug)]
pub struct Schema {
    version: u64,
    name: String,
    tables: Vec<TableDef>,
    groups: Vec<Group>,
    indexes: Vec<GroupIndexDef>,
    table_names: HashMap<String, TableId>,
    index_names: HashMap<String, IndexId>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Monotonic identity; caches key on it and swap wholesale when it moves.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table(&self, id: TableId) -> &TableDef {
        &self.tables[id.0 as usize]
    }

    pub fn table_named(&self, name: &str) -> Result<&TableDef> {
        match self.table_names.get(name) {
            Some(&id) => Ok(self.table(id)),
            None => bail!(Fault::UnknownTable {
                name: name.to_string(),
            }),
        }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0 as usize]
    }

    pub fn indexes(&self) -> &[GroupIndexDef] {
        &self.indexes
    }

    pub fn index(&self, id: IndexId) -> &GroupIndexDef {
        &self.indexes[id.0 as usize]
    }

    pub fn index_named(&self, name: &str) -> Result<&GroupIndexDef> {
        match self.index_names.get(name) {
            Some(&id) => Ok(self.index(id)),
            None => bail!(Fault::UnknownIndex {
                name: name.to_string(),
            }),
        }
    }

    /// True when `table` is `ancestor` or lies below it in the group tree.
    pub fn is_descendant_or_self(&self, table: TableId, ancestor: TableId) -> bool {
        let mut cursor = Some(table);
        while let Some(t) = cursor {
            if t == ancestor {
                return true;
            }
            cursor = self.table(t).parent_join().map(|pj| pj.parent);
        }
        false
    }

    /// Group indexes a mutation of `table` can affect: those whose leaf-most
    /// table is `table` itself or one of its descendants.
    pub fn affecting_indexes(&self, table: TableId) -> Vec<&GroupIndexDef> {
        self.indexes
            .iter()
            .filter(|gi| self.is_descendant_or_self(gi.leaf_most(), table))
            .collect()
    }
}
