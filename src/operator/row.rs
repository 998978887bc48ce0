//! Row identity inside the operator framework.
//!
//! Every row flowing between operators carries a [`RowTypeId`] naming its
//! shape. Table rows use the table's own layout; flattening two shapes
//! produces a synthetic layout whose fields are the parent's followed by
//! the child's, and group index scans produce index-shaped rows decoded
//! from entry keys. The [`RowTypeRegistry`] owns all shapes for one schema
//! version and memoizes flattening so repeated plan builds share layouts.
//!
//! A [`Row`] is cheap to clone: the image is behind an `Arc`, and the hkey
//! is the only per-clone allocation.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::hkey::HKey;
use crate::rowdata::{RowBuilder, RowData, RowLayout, RowView};
use crate::schema::{FieldDef, GroupIndexDef, IndexId, Schema, TableId};

/// High bit marks row definition ids minted by the registry rather than
/// taken from a table.
const SYNTHETIC_ROW_DEF: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowTypeId(pub u32);

/// One table's span inside a (possibly flattened) row shape.
#[derive(Debug, Clone)]
pub struct Constituent {
    pub table: TableId,
    pub start: usize,
    pub len: usize,
}

pub struct RowType {
    id: RowTypeId,
    layout: Arc<RowLayout>,
    constituents: Vec<Constituent>,
}

impl RowType {
    pub fn id(&self) -> RowTypeId {
        self.id
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }

    pub fn constituents(&self) -> &[Constituent] {
        &self.constituents
    }

    pub fn includes(&self, table: TableId) -> bool {
        self.constituents.iter().any(|c| c.table == table)
    }

    /// Position of `table`'s field `field` inside this shape, if the table
    /// is one of its constituents.
    pub fn field_position(&self, table: TableId, field: usize) -> Option<usize> {
        self.constituents
            .iter()
            .find(|c| c.table == table && field < c.len)
            .map(|c| c.start + field)
    }
}

pub struct RowTypeRegistry {
    types: Vec<RowType>,
    table_types: HashMap<TableId, RowTypeId>,
    flatten_memo: HashMap<(RowTypeId, TableId), RowTypeId>,
    index_types: HashMap<IndexId, RowTypeId>,
}

impl RowTypeRegistry {
    pub fn new(schema: &Schema) -> Self {
        let mut registry = Self {
            types: Vec::new(),
            table_types: HashMap::new(),
            flatten_memo: HashMap::new(),
            index_types: HashMap::new(),
        };
        for table in schema.tables() {
            let id = RowTypeId(registry.types.len() as u32);
            registry.types.push(RowType {
                id,
                layout: Arc::clone(table.layout()),
                constituents: vec![Constituent {
                    table: table.id(),
                    start: 0,
                    len: table.fields().len(),
                }],
            });
            registry.table_types.insert(table.id(), id);
        }
        registry
    }

    pub fn row_type(&self, id: RowTypeId) -> &RowType {
        &self.types[id.0 as usize]
    }

    pub fn table_type(&self, table: TableId) -> RowTypeId {
        self.table_types[&table]
    }

    /// The table behind a table-shaped row type; `None` for synthetic
    /// shapes.
    pub fn table_of(&self, id: RowTypeId) -> Option<TableId> {
        let row_type = self.row_type(id);
        match row_type.constituents.as_slice() {
            [only] if self.table_types.get(&only.table) == Some(&id) => Some(only.table),
            _ => None,
        }
    }

    /// Shape registered for an index by [`Self::index_type`], if any.
    pub fn index_row_type(&self, index: IndexId) -> Option<RowTypeId> {
        self.index_types.get(&index).copied()
    }

    /// Shape of flattening a `parent`-shaped row with a row of
    /// `child`. Memoized; layouts are shared across plans.
    pub fn flatten_type(
        &mut self,
        schema: &Schema,
        parent: RowTypeId,
        child: TableId,
    ) -> RowTypeId {
        if let Some(&id) = self.flatten_memo.get(&(parent, child)) {
            return id;
        }
        let child_def = schema.table(child);
        let parent_type = &self.types[parent.0 as usize];
        let mut fields: Vec<FieldDef> = parent_type.layout.fields().to_vec();
        // Child fields become nullable in the flattened shape: a
        // parent-preserving flatten emits them as NULL.
        fields.extend(child_def.fields().iter().cloned());
        let mut constituents = parent_type.constituents.clone();
        let start = parent_type.layout.field_count();
        constituents.push(Constituent {
            table: child,
            start,
            len: child_def.fields().len(),
        });
        let qualifier = format!("{}+{}", parent_type.layout.qualifier_name(), child_def.name());
        let id = RowTypeId(self.types.len() as u32);
        let layout = Arc::new(RowLayout::new(
            SYNTHETIC_ROW_DEF | id.0,
            &qualifier,
            fields,
        ));
        self.types.push(RowType {
            id,
            layout,
            constituents,
        });
        self.flatten_memo.insert((parent, child), id);
        id
    }

    /// Shape of rows produced by scanning a group index: one field per
    /// indexed column, decoded from the entry key.
    pub fn index_type(&mut self, schema: &Schema, index: &GroupIndexDef) -> RowTypeId {
        if let Some(&id) = self.index_types.get(&index.id()) {
            return id;
        }
        let fields: Vec<FieldDef> = index
            .columns()
            .iter()
            .map(|col| {
                let table = schema.table(col.table);
                FieldDef::new(
                    format!("{}_{}", table.name(), table.field(col.field).name()),
                    col.field_type,
                )
            })
            .collect();
        let id = RowTypeId(self.types.len() as u32);
        let layout = Arc::new(RowLayout::new(
            SYNTHETIC_ROW_DEF | id.0,
            index.name(),
            fields,
        ));
        self.types.push(RowType {
            id,
            layout,
            constituents: Vec::new(),
        });
        self.index_types.insert(index.id(), id);
        id
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    row_type: RowTypeId,
    hkey: HKey,
    data: Arc<RowData>,
}

impl Row {
    pub fn new(row_type: RowTypeId, hkey: HKey, data: Arc<RowData>) -> Self {
        Self {
            row_type,
            hkey,
            data,
        }
    }

    pub fn row_type(&self) -> RowTypeId {
        self.row_type
    }

    pub fn hkey(&self) -> &HKey {
        &self.hkey
    }

    pub fn data(&self) -> &Arc<RowData> {
        &self.data
    }

    pub fn view<'r>(&'r self, registry: &'r RowTypeRegistry) -> Result<RowView<'r>> {
        RowView::new(
            self.data.as_bytes(),
            registry.row_type(self.row_type).layout(),
        )
    }
}

/// Combine a parent-shaped row with an optional child row into the given
/// flattened shape. With no child the child span is NULL and the result
/// keeps the parent's hkey; with a child the result takes the child's
/// hkey, which addresses the deepest constituent.
pub fn flatten_rows(
    registry: &RowTypeRegistry,
    output: RowTypeId,
    parent: &Row,
    child: Option<&Row>,
) -> Result<Row> {
    let out_type = registry.row_type(output);
    let parent_view = parent.view(registry)?;
    let parent_width = parent_view.layout().field_count();
    ensure!(
        out_type.layout().field_count() >= parent_width,
        "flatten output narrower than its parent shape"
    );
    let mut builder = RowBuilder::new(out_type.layout());
    for i in 0..parent_width {
        if parent_view.is_null(i) {
            builder.put_null(i);
        } else {
            builder.put_value(i, &parent_view.get_value(i)?)?;
        }
    }
    let hkey = match child {
        Some(child) => {
            let child_view = child.view(registry)?;
            let child_width = child_view.layout().field_count();
            ensure!(
                parent_width + child_width == out_type.layout().field_count(),
                "flatten child width does not complete the output shape"
            );
            for i in 0..child_width {
                if child_view.is_null(i) {
                    builder.put_null(parent_width + i);
                } else {
                    builder.put_value(parent_width + i, &child_view.get_value(i)?)?;
                }
            }
            child.hkey().clone()
        }
        None => {
            for i in parent_width..out_type.layout().field_count() {
                builder.put_null(i);
            }
            parent.hkey().clone()
        }
    };
    Ok(Row::new(output, hkey, Arc::new(builder.build()?)))
}
