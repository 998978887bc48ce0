//! # RowView - Zero-Copy Row Access
//!
//! Reads a binary row in place with O(1) column access. All getters return
//! references into (or direct reads from) the underlying buffer; `get_value`
//! materializes an owned [`Value`] when the operator framework needs one.
//!
//! A view borrows immutably from a byte slice, so any number of views can
//! read the same row concurrently.

use eyre::{bail, Result};
use zerocopy::FromBytes;

use crate::error::Fault;
use crate::rowdata::format::{RowHeader, RowLayout};
use crate::types::{Charset, FieldType, Value};

#[derive(Debug)]
pub struct RowView<'a> {
    data: &'a [u8],
    layout: &'a RowLayout,
}

impl<'a> RowView<'a> {
    pub fn new(data: &'a [u8], layout: &'a RowLayout) -> Result<Self> {
        let (header, _) = RowHeader::read_from_prefix(data).map_err(|_| Fault::CorruptRow {
            reason: "row too small for header".into(),
        })?;
        if header.row_len() as usize != data.len() {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "row length field {} does not match buffer length {}",
                    header.row_len(),
                    data.len()
                ),
            });
        }
        if header.row_def_id() != layout.row_def_id() {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "row definition {} read with layout for definition {}",
                    header.row_def_id(),
                    layout.row_def_id()
                ),
            });
        }
        if header.field_count() as usize != layout.field_count() {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "row field count {} does not match layout field count {}",
                    header.field_count(),
                    layout.field_count()
                ),
            });
        }
        Ok(Self { data, layout })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn layout(&self) -> &'a RowLayout {
        self.layout
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bitmap = &self.data[super::ROW_HEADER_LEN..];
        bitmap[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn fixed_slice(&self, idx: usize, width: usize) -> &'a [u8] {
        let offset = self.layout.fixed_area_offset() + self.layout.fixed_offset(idx);
        &self.data[offset..offset + width]
    }

    fn check_not_null(&self, idx: usize) -> Result<()> {
        if self.is_null(idx) {
            bail!(Fault::CorruptRow {
                reason: format!("null read as a value at {}", self.layout.qualified(idx)),
            });
        }
        Ok(())
    }

    pub fn get_i32(&self, idx: usize) -> Result<i32> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 4);
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 8);
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_u64(&self, idx: usize) -> Result<u64> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 8);
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 8);
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_date(&self, idx: usize) -> Result<i32> {
        self.get_i32_raw(idx)
    }

    pub fn get_timestamp(&self, idx: usize) -> Result<i64> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 8);
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn get_i32_raw(&self, idx: usize) -> Result<i32> {
        self.check_not_null(idx)?;
        let b = self.fixed_slice(idx, 4);
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_decimal(&self, idx: usize) -> Result<i128> {
        self.check_not_null(idx)?;
        let FieldType::Decimal { precision, .. } = self.layout.field(idx).field_type() else {
            bail!(Fault::CorruptRow {
                reason: format!("{} is not a decimal", self.layout.qualified(idx)),
            });
        };
        match FieldType::decimal_width(precision) {
            4 => {
                let b = self.fixed_slice(idx, 4);
                Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i128)
            }
            8 => {
                let b = self.fixed_slice(idx, 8);
                Ok(i64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]) as i128)
            }
            _ => {
                let b = self.fixed_slice(idx, 16);
                let mut wide = [0u8; 16];
                wide.copy_from_slice(b);
                Ok(i128::from_le_bytes(wide))
            }
        }
    }

    /// Payload bounds of a variable-length field, past its length prefix.
    fn var_payload(&self, idx: usize) -> Result<&'a [u8]> {
        let Some(var_idx) = self.layout.var_index(idx) else {
            bail!(Fault::CorruptRow {
                reason: format!("{} is not variable-length", self.layout.qualified(idx)),
            });
        };
        let table = self.layout.offset_table_offset();
        let end_at = |i: usize| -> u32 {
            let o = table + i * 4;
            u32::from_le_bytes([
                self.data[o],
                self.data[o + 1],
                self.data[o + 2],
                self.data[o + 3],
            ])
        };
        let start = if var_idx == 0 { 0 } else { end_at(var_idx - 1) } as usize;
        let end = end_at(var_idx) as usize;
        let area = self.layout.var_area_offset();
        if area + end > self.data.len() || end < start {
            bail!(Fault::CorruptRow {
                reason: format!("var offsets out of bounds at {}", self.layout.qualified(idx)),
            });
        }
        let field = &self.data[area + start..area + end];

        let ty = self.layout.field(idx).field_type();
        let prefix = ty.var_prefix_width().unwrap_or(4) as usize;
        if field.len() < prefix {
            bail!(Fault::CorruptRow {
                reason: format!("var field shorter than its length prefix at {}", self.layout.qualified(idx)),
            });
        }
        let declared = match prefix {
            1 => field[0] as usize,
            2 => u16::from_le_bytes([field[0], field[1]]) as usize,
            _ => u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize,
        };
        if declared != field.len() - prefix {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "length prefix {declared} disagrees with payload length {} at {}",
                    field.len() - prefix,
                    self.layout.qualified(idx)
                ),
            });
        }
        Ok(&field[prefix..])
    }

    pub fn get_bytes(&self, idx: usize) -> Result<&'a [u8]> {
        self.check_not_null(idx)?;
        self.var_payload(idx)
    }

    /// Zero-copy text access. Latin-1 columns need [`Self::get_text`].
    pub fn get_str(&self, idx: usize) -> Result<&'a str> {
        self.check_not_null(idx)?;
        let ty = self.layout.field(idx).field_type();
        let FieldType::Varchar { charset, .. } = ty else {
            bail!(Fault::CorruptRow {
                reason: format!("{} is not a varchar", self.layout.qualified(idx)),
            });
        };
        if charset == Charset::Latin1 {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "latin-1 column {} cannot be read zero-copy",
                    self.layout.qualified(idx)
                ),
            });
        }
        let payload = self.var_payload(idx)?;
        std::str::from_utf8(payload).map_err(|_| {
            Fault::CorruptRow {
                reason: format!("invalid utf-8 in {}", self.layout.qualified(idx)),
            }
            .into()
        })
    }

    /// Owned text access; handles every supported charset.
    pub fn get_text(&self, idx: usize) -> Result<String> {
        self.check_not_null(idx)?;
        let ty = self.layout.field(idx).field_type();
        let FieldType::Varchar { charset, .. } = ty else {
            bail!(Fault::CorruptRow {
                reason: format!("{} is not a varchar", self.layout.qualified(idx)),
            });
        };
        let payload = self.var_payload(idx)?;
        match charset {
            Charset::Utf8 | Charset::Ascii => Ok(std::str::from_utf8(payload)
                .map_err(|_| Fault::CorruptRow {
                    reason: format!("invalid utf-8 in {}", self.layout.qualified(idx)),
                })?
                .to_string()),
            Charset::Latin1 => Ok(payload.iter().map(|&b| b as char).collect()),
        }
    }

    /// Materializes the field as an owned value, NULL included.
    pub fn get_value(&self, idx: usize) -> Result<Value> {
        if self.is_null(idx) {
            return Ok(Value::Null);
        }
        match self.layout.field(idx).field_type() {
            FieldType::Int32 => Ok(Value::Int32(self.get_i32(idx)?)),
            FieldType::Int64 => Ok(Value::Int64(self.get_i64(idx)?)),
            FieldType::Uint64 => Ok(Value::Uint64(self.get_u64(idx)?)),
            FieldType::Float64 => Ok(Value::Float64(self.get_f64(idx)?)),
            FieldType::Decimal { scale, .. } => Ok(Value::Decimal {
                digits: self.get_decimal(idx)?,
                scale,
            }),
            FieldType::Date => Ok(Value::Date(self.get_date(idx)?)),
            FieldType::Timestamp => Ok(Value::Timestamp(self.get_timestamp(idx)?)),
            FieldType::Varchar { .. } => Ok(Value::Text(self.get_text(idx)?)),
            FieldType::Varbinary { .. } => Ok(Value::Bytes(self.get_bytes(idx)?.to_vec())),
        }
    }
}
