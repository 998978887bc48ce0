//! # Table Definition Module
//!
//! Schema metadata consumed by this tier: field definitions, parent joins,
//! primary keys, and the precomputed hkey segment sources. Definitions are
//! authored through builders (`FieldDef`, `TableBuilder`) and resolved into
//! arena entries (`TableDef`) by `Schema::build`, which assigns ids,
//! ordinals, depths, and layouts.
//!
//! ## Hierarchy Model
//!
//! Tables reference their parent by a single upward join; children are held
//! as an id list, never as object references, so there are no ownership
//! cycles. A child's foreign-key fields must cover every rootward hkey
//! column ("hkey-complete" joins), which is what lets a row's full hkey
//! derive from its own physical encoding alone.

use std::sync::Arc;

use crate::rowdata::RowLayout;
use crate::schema::{GroupId, TableId};
use crate::types::FieldType;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    field_type: FieldType,
    nullable: bool,
    declared_charset: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            declared_charset: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Declares a character set by name; resolved (and possibly rejected)
    /// at schema build.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.declared_charset = Some(charset.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn declared_charset(&self) -> Option<&str> {
        self.declared_charset.as_deref()
    }

    pub(crate) fn set_field_type(&mut self, field_type: FieldType) {
        self.field_type = field_type;
    }
}

/// Authoring-time table description; resolved by `Schema::build`.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    fields: Vec<FieldDef>,
    primary_key: Vec<String>,
    parent: Option<(String, Vec<String>)>,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            primary_key: Vec::new(),
            parent: None,
        }
    }

    pub fn with_primary_key(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Joins this table under `parent`; `fk_columns` must cover the parent's
    /// entire hkey column chain, rootmost first.
    pub fn with_parent(
        mut self,
        parent: impl Into<String>,
        fk_columns: Vec<impl Into<String>>,
    ) -> Self {
        self.parent = Some((
            parent.into(),
            fk_columns.into_iter().map(|c| c.into()).collect(),
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Vec<FieldDef> {
        &mut self.fields
    }

    pub(crate) fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub(crate) fn parent(&self) -> Option<(&str, &[String])> {
        self.parent
            .as_ref()
            .map(|(name, fks)| (name.as_str(), fks.as_slice()))
    }
}

/// Upward join to the parent table. `fk_fields` are positions in the child's
/// own row and cover the parent's full hkey column chain, rootmost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentJoin {
    pub parent: TableId,
    pub fk_fields: Vec<usize>,
}

/// One hkey segment: the table's ordinal marker followed by the key-column
/// values, all sourced from positions in the owning row itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HKeySegment {
    pub ordinal: u8,
    pub table: TableId,
    pub fields: Vec<usize>,
}

/// Precomputed hkey shape for one table: segment order is fixed at schema
/// build, so identical logical identity always encodes to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HKeyMeta {
    pub segments: Vec<HKeySegment>,
}

impl HKeyMeta {
    /// Total number of key columns across all segments.
    pub fn column_count(&self) -> usize {
        self.segments.iter().map(|s| s.fields.len()).sum()
    }
}

/// A resolved table in the schema arena.
#[derive(Debug, Clone)]
pub struct TableDef {
    id: TableId,
    name: String,
    fields: Vec<FieldDef>,
    pk_fields: Vec<usize>,
    parent: Option<ParentJoin>,
    children: Vec<TableId>,
    ordinal: u8,
    depth: usize,
    group: GroupId,
    layout: Arc<RowLayout>,
    hkey: HKeyMeta,
}

impl TableDef {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TableId,
        name: String,
        fields: Vec<FieldDef>,
        pk_fields: Vec<usize>,
        parent: Option<ParentJoin>,
        layout: Arc<RowLayout>,
    ) -> Self {
        Self {
            id,
            name,
            fields,
            pk_fields,
            parent,
            children: Vec::new(),
            ordinal: 0,
            depth: 0,
            group: GroupId(0),
            layout,
            hkey: HKeyMeta::default(),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> &FieldDef {
        &self.fields[idx]
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn primary_key(&self) -> &[usize] {
        &self.pk_fields
    }

    pub fn parent_join(&self) -> Option<&ParentJoin> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[TableId] {
        &self.children
    }

    /// Position marker within the group's table tree; fits one byte and is
    /// strictly below the 0xFF range sentinel.
    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }

    /// 0 for a group root; parents always have a smaller depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of hkey segments for this table's rows.
    pub fn hkey_segments(&self) -> usize {
        self.depth + 1
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }

    pub fn hkey_meta(&self) -> &HKeyMeta {
        &self.hkey
    }

    pub(crate) fn add_child(&mut self, child: TableId) {
        self.children.push(child);
    }

    pub(crate) fn place_in_group(&mut self, group: GroupId, ordinal: u8, depth: usize) {
        self.group = group;
        self.ordinal = ordinal;
        self.depth = depth;
    }

    pub(crate) fn set_hkey_meta(&mut self, meta: HKeyMeta) {
        self.hkey = meta;
    }
}
