//! # RowData Binary Layout
//!
//! Every physical row is a self-delimiting byte buffer, little-endian
//! throughout:
//!
//! ```text
//! +---------------------------+
//! | row_len      u32          |  total byte length including header
//! | row_def_id   u32          |  owning row definition
//! | field_count  u16          |
//! +---------------------------+
//! | null bitmap  (n+7)/8      |  bit set = SQL NULL
//! +---------------------------+
//! | var end-offsets u32 x v   |  end of each var payload, relative to
//! |                           |  the start of the var area
//! +---------------------------+
//! | fixed-width area          |  schema-computed offsets, reserved
//! |                           |  whether or not the field is null
//! +---------------------------+
//! | var-length area           |  per field: length prefix + payload;
//! |                           |  prefix width from the declared maximum
//! +---------------------------+
//! ```
//!
//! Field order and offsets are fully determined by the owning row
//! definition; `RowLayout` precomputes them once per definition so builders
//! and views never re-derive widths per row. A group (flattened) record's
//! fields are the ordered concatenation of each constituent table's fields,
//! and reuse this exact layout with a synthetic row definition id.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::schema::FieldDef;
use crate::zerocopy_accessors;

pub const ROW_HEADER_LEN: usize = 10;

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RowHeader {
    row_len: U32,
    row_def_id: U32,
    field_count: U16,
}

impl RowHeader {
    pub fn new(row_len: u32, row_def_id: u32, field_count: u16) -> Self {
        Self {
            row_len: U32::new(row_len),
            row_def_id: U32::new(row_def_id),
            field_count: U16::new(field_count),
        }
    }

    zerocopy_accessors! {
        row_len: u32,
        row_def_id: u32,
        field_count: u16,
    }
}

/// Precomputed per-row-definition layout: fixed offsets, variable-field
/// numbering, prefix widths, and qualified column names for fault messages.
#[derive(Debug, Clone)]
pub struct RowLayout {
    row_def_id: u32,
    qualifier: String,
    fields: Vec<FieldDef>,
    qualified: Vec<String>,
    fixed_offsets: Vec<u32>,
    var_index: Vec<Option<u16>>,
    fixed_len: usize,
    var_count: usize,
    bitmap_len: usize,
}

impl RowLayout {
    pub fn new(row_def_id: u32, qualifier: &str, fields: Vec<FieldDef>) -> Self {
        let mut fixed_offsets = Vec::with_capacity(fields.len());
        let mut var_index = Vec::with_capacity(fields.len());
        let mut qualified = Vec::with_capacity(fields.len());
        let mut fixed_len = 0u32;
        let mut var_count = 0u16;
        for field in &fields {
            qualified.push(format!("{qualifier}.{}", field.name()));
            match field.field_type().fixed_width() {
                Some(width) => {
                    fixed_offsets.push(fixed_len);
                    var_index.push(None);
                    fixed_len += width as u32;
                }
                None => {
                    fixed_offsets.push(0);
                    var_index.push(Some(var_count));
                    var_count += 1;
                }
            }
        }
        let bitmap_len = fields.len().div_ceil(8);
        Self {
            row_def_id,
            qualifier: qualifier.to_string(),
            fields,
            qualified,
            fixed_offsets,
            var_index,
            fixed_len: fixed_len as usize,
            var_count: var_count as usize,
            bitmap_len,
        }
    }

    pub fn row_def_id(&self) -> u32 {
        self.row_def_id
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> &FieldDef {
        &self.fields[idx]
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Qualified `table.column` name, for fault messages.
    pub fn qualified(&self, idx: usize) -> &str {
        &self.qualified[idx]
    }

    pub fn qualifier_name(&self) -> &str {
        &self.qualifier
    }

    /// Offset within the fixed-width area. Meaningless for var fields.
    pub fn fixed_offset(&self, idx: usize) -> usize {
        self.fixed_offsets[idx] as usize
    }

    pub fn var_index(&self, idx: usize) -> Option<usize> {
        self.var_index[idx].map(|v| v as usize)
    }

    pub fn fixed_len(&self) -> usize {
        self.fixed_len
    }

    pub fn var_count(&self) -> usize {
        self.var_count
    }

    pub fn bitmap_len(&self) -> usize {
        self.bitmap_len
    }

    /// Offset of the fixed-width area from the start of the row.
    pub fn fixed_area_offset(&self) -> usize {
        ROW_HEADER_LEN + self.bitmap_len + self.var_count * 4
    }

    /// Offset of the var-length area from the start of the row.
    pub fn var_area_offset(&self) -> usize {
        self.fixed_area_offset() + self.fixed_len
    }

    /// Offset of the var end-offset table from the start of the row.
    pub fn offset_table_offset(&self) -> usize {
        ROW_HEADER_LEN + self.bitmap_len
    }
}
