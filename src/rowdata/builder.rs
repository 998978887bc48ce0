//! # RowBuilder - Row Construction
//!
//! Constructs a binary row against a precomputed [`RowLayout`]. Every
//! `put_*` operation returns the encoded byte length. The builder supports
//! `reset` for zero-alloc reuse across rows of the same definition.
//!
//! ## Usage
//!
//! ```ignore
//! let mut builder = RowBuilder::new(&layout);
//! builder.put_i64(0, 42)?;
//! builder.put_str(1, "ann")?;
//! let row = builder.build()?;
//! ```
//!
//! A field left untouched is *unbound*, which is distinct from an explicit
//! NULL: `build` refuses unbound fields with a "value source is null" fault,
//! while `build_partial` tolerates them for fields outside the selector.

use eyre::{bail, ensure, Result};

use crate::error::Fault;
use crate::rowdata::format::{RowHeader, RowLayout, ROW_HEADER_LEN};
use crate::rowdata::{ColumnSelector, RowData};
use crate::types::{Charset, FieldType, Value};
use zerocopy::IntoBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unbound,
    Null,
    Set,
}

pub struct RowBuilder<'a> {
    layout: &'a RowLayout,
    null_bitmap: Vec<u8>,
    fixed_data: Vec<u8>,
    var_data: Vec<Vec<u8>>,
    bindings: Vec<Binding>,
}

impl<'a> RowBuilder<'a> {
    pub fn new(layout: &'a RowLayout) -> Self {
        Self {
            layout,
            null_bitmap: vec![0u8; layout.bitmap_len()],
            fixed_data: vec![0u8; layout.fixed_len()],
            var_data: vec![Vec::new(); layout.var_count()],
            bindings: vec![Binding::Unbound; layout.field_count()],
        }
    }

    pub fn reset(&mut self) {
        self.null_bitmap.fill(0);
        self.fixed_data.fill(0);
        for var in &mut self.var_data {
            var.clear();
        }
        for binding in &mut self.bindings {
            *binding = Binding::Unbound;
        }
    }

    pub fn is_bound(&self, idx: usize) -> bool {
        self.bindings[idx] != Binding::Unbound
    }

    pub fn put_null(&mut self, idx: usize) -> usize {
        self.null_bitmap[idx / 8] |= 1 << (idx % 8);
        self.bindings[idx] = Binding::Null;
        if let Some(var_idx) = self.layout.var_index(idx) {
            self.var_data[var_idx].clear();
        }
        0
    }

    fn set_fixed(&mut self, idx: usize, bytes: &[u8]) -> usize {
        self.null_bitmap[idx / 8] &= !(1 << (idx % 8));
        let offset = self.layout.fixed_offset(idx);
        self.fixed_data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.bindings[idx] = Binding::Set;
        bytes.len()
    }

    fn expect_type(&self, idx: usize, wanted: &str, ok: bool) -> Result<()> {
        ensure!(
            ok,
            "field {} is not {wanted} (declared {:?})",
            self.layout.qualified(idx),
            self.layout.field(idx).field_type()
        );
        Ok(())
    }

    pub fn put_i32(&mut self, idx: usize, value: i32) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "an int32", matches!(ty, FieldType::Int32))?;
        Ok(self.set_fixed(idx, &value.to_le_bytes()))
    }

    pub fn put_i64(&mut self, idx: usize, value: i64) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "an int64", matches!(ty, FieldType::Int64))?;
        Ok(self.set_fixed(idx, &value.to_le_bytes()))
    }

    pub fn put_u64(&mut self, idx: usize, value: u64) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "a uint64", matches!(ty, FieldType::Uint64))?;
        Ok(self.set_fixed(idx, &value.to_le_bytes()))
    }

    /// Stores an unsigned 64-bit column from a wide integer value. Values
    /// outside `0 ..= u64::MAX` are an encoding fault, not a truncation.
    pub fn put_u64_big(&mut self, idx: usize, value: i128) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "a uint64", matches!(ty, FieldType::Uint64))?;
        let Ok(narrowed) = u64::try_from(value) else {
            bail!(Fault::ValueOutOfRange {
                what: format!(
                    "{value} does not fit an unsigned 64-bit column {}",
                    self.layout.qualified(idx)
                ),
            });
        };
        Ok(self.set_fixed(idx, &narrowed.to_le_bytes()))
    }

    pub fn put_f64(&mut self, idx: usize, value: f64) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "a float64", matches!(ty, FieldType::Float64))?;
        Ok(self.set_fixed(idx, &value.to_le_bytes()))
    }

    pub fn put_date(&mut self, idx: usize, days: i32) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "a date", matches!(ty, FieldType::Date))?;
        Ok(self.set_fixed(idx, &days.to_le_bytes()))
    }

    pub fn put_timestamp(&mut self, idx: usize, micros: i64) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        self.expect_type(idx, "a timestamp", matches!(ty, FieldType::Timestamp))?;
        Ok(self.set_fixed(idx, &micros.to_le_bytes()))
    }

    /// Stores a decimal as a scaled two's-complement integer in the width
    /// the declared precision dictates.
    pub fn put_decimal(&mut self, idx: usize, digits: i128) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        let FieldType::Decimal { precision, .. } = ty else {
            bail!(
                "field {} is not a decimal (declared {ty:?})",
                self.layout.qualified(idx)
            );
        };
        let width = FieldType::decimal_width(precision);
        match width {
            4 => {
                let Ok(v) = i32::try_from(digits) else {
                    bail!(self.decimal_range_fault(idx, digits));
                };
                Ok(self.set_fixed(idx, &v.to_le_bytes()))
            }
            8 => {
                let Ok(v) = i64::try_from(digits) else {
                    bail!(self.decimal_range_fault(idx, digits));
                };
                Ok(self.set_fixed(idx, &v.to_le_bytes()))
            }
            _ => Ok(self.set_fixed(idx, &digits.to_le_bytes())),
        }
    }

    fn decimal_range_fault(&self, idx: usize, digits: i128) -> Fault {
        Fault::ValueOutOfRange {
            what: format!(
                "scaled decimal {digits} exceeds declared precision of {}",
                self.layout.qualified(idx)
            ),
        }
    }

    pub fn put_str(&mut self, idx: usize, text: &str) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        let FieldType::Varchar { max_len, charset } = ty else {
            bail!(
                "field {} is not a varchar (declared {ty:?})",
                self.layout.qualified(idx)
            );
        };
        let encoded: Vec<u8> = match charset {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Ascii => {
                if !text.is_ascii() {
                    bail!(Fault::ValueOutOfRange {
                        what: format!(
                            "non-ascii text for ascii column {}",
                            self.layout.qualified(idx)
                        ),
                    });
                }
                text.as_bytes().to_vec()
            }
            Charset::Latin1 => {
                let mut bytes = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xFF {
                        bail!(Fault::ValueOutOfRange {
                            what: format!(
                                "character {ch:?} not representable in latin-1 column {}",
                                self.layout.qualified(idx)
                            ),
                        });
                    }
                    bytes.push(code as u8);
                }
                bytes
            }
        };
        if encoded.len() > max_len as usize {
            bail!(Fault::StringTooLong {
                column: self.layout.qualified(idx).to_string(),
                len: encoded.len(),
                max: max_len as usize,
            });
        }
        self.set_var(idx, ty, encoded)
    }

    pub fn put_bytes(&mut self, idx: usize, data: &[u8]) -> Result<usize> {
        let ty = self.layout.field(idx).field_type();
        let FieldType::Varbinary { max_len } = ty else {
            bail!(
                "field {} is not a varbinary (declared {ty:?})",
                self.layout.qualified(idx)
            );
        };
        if data.len() > max_len as usize {
            bail!(Fault::StringTooLong {
                column: self.layout.qualified(idx).to_string(),
                len: data.len(),
                max: max_len as usize,
            });
        }
        self.set_var(idx, ty, data.to_vec())
    }

    fn set_var(&mut self, idx: usize, ty: FieldType, payload: Vec<u8>) -> Result<usize> {
        let var_idx = match self.layout.var_index(idx) {
            Some(v) => v,
            None => bail!(
                "field {} is not variable-length",
                self.layout.qualified(idx)
            ),
        };
        let prefix_width = match ty.var_prefix_width() {
            Some(w) => w as usize,
            None => bail!(
                "field {} has no declared maximum",
                self.layout.qualified(idx)
            ),
        };
        self.null_bitmap[idx / 8] &= !(1 << (idx % 8));
        let buf = &mut self.var_data[var_idx];
        buf.clear();
        let len = payload.len();
        match prefix_width {
            1 => buf.push(len as u8),
            2 => buf.extend((len as u16).to_le_bytes()),
            _ => buf.extend((len as u32).to_le_bytes()),
        }
        buf.extend(payload);
        self.bindings[idx] = Binding::Set;
        Ok(prefix_width + len)
    }

    /// Dispatches a decoded value to the matching `put_*`. Returns the
    /// encoded byte length.
    pub fn put_value(&mut self, idx: usize, value: &Value) -> Result<usize> {
        match value {
            Value::Null => Ok(self.put_null(idx)),
            Value::Int32(v) => self.put_i32(idx, *v),
            Value::Int64(v) => self.put_i64(idx, *v),
            Value::Uint64(v) => self.put_u64(idx, *v),
            Value::Float64(v) => self.put_f64(idx, *v),
            Value::Decimal { digits, .. } => self.put_decimal(idx, *digits),
            Value::Date(days) => self.put_date(idx, *days),
            Value::Timestamp(micros) => self.put_timestamp(idx, *micros),
            Value::Text(s) => self.put_str(idx, s),
            Value::Bytes(b) => self.put_bytes(idx, b),
        }
    }

    /// Assembles the row; every field must be bound (value or explicit null).
    pub fn build(&self) -> Result<RowData> {
        for (idx, binding) in self.bindings.iter().enumerate() {
            if *binding == Binding::Unbound {
                bail!(Fault::ValueSourceNull {
                    column: self.layout.qualified(idx).to_string(),
                });
            }
        }
        Ok(self.assemble())
    }

    /// Assembles a partial image: fields outside the selector may stay
    /// unbound and encode as NULL; selected fields must still be bound.
    pub fn build_partial(&self, selector: &ColumnSelector) -> Result<RowData> {
        for (idx, binding) in self.bindings.iter().enumerate() {
            if *binding == Binding::Unbound && selector.is_selected(idx) {
                bail!(Fault::ValueSourceNull {
                    column: self.layout.qualified(idx).to_string(),
                });
            }
        }
        let mut bitmap = self.null_bitmap.clone();
        for (idx, binding) in self.bindings.iter().enumerate() {
            if *binding == Binding::Unbound {
                bitmap[idx / 8] |= 1 << (idx % 8);
            }
        }
        Ok(self.assemble_with_bitmap(&bitmap))
    }

    fn assemble(&self) -> RowData {
        self.assemble_with_bitmap(&self.null_bitmap)
    }

    fn assemble_with_bitmap(&self, bitmap: &[u8]) -> RowData {
        let var_len: usize = self.var_data.iter().map(|v| v.len()).sum();
        let total = ROW_HEADER_LEN
            + bitmap.len()
            + self.var_data.len() * 4
            + self.fixed_data.len()
            + var_len;

        let mut bytes = Vec::with_capacity(total);
        let header = RowHeader::new(
            total as u32,
            self.layout.row_def_id(),
            self.layout.field_count() as u16,
        );
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(bitmap);

        let mut end: u32 = 0;
        for var in &self.var_data {
            end += var.len() as u32;
            bytes.extend(end.to_le_bytes());
        }
        bytes.extend_from_slice(&self.fixed_data);
        for var in &self.var_data {
            bytes.extend_from_slice(var);
        }
        RowData::from_built(bytes)
    }
}
