//! # RowData Codec
//!
//! Binary row (de)serialization: `RowBuilder` constructs rows field by field
//! with per-type `put_*` operations, `RowView` reads them back zero-copy, and
//! `RowData` is the owned buffer that moves through the operator framework
//! and the storage engine. The byte layout lives in [`format`].
//!
//! The null bitmap records absence separately from zero-length values, and an
//! unbound field is a third, distinct state: building a row with one raises a
//! "value source is null" fault unless a `ColumnSelector` marks the field as
//! intentionally outside a partial image.

pub mod builder;
pub mod format;
pub mod view;

pub use builder::RowBuilder;
pub use format::{RowHeader, RowLayout, ROW_HEADER_LEN};
pub use view::RowView;

use eyre::{bail, Result};
use zerocopy::FromBytes;

use crate::error::Fault;

/// An owned, self-delimiting binary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowData {
    bytes: Vec<u8>,
}

impl RowData {
    /// Wraps raw bytes, validating the header frame.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < ROW_HEADER_LEN {
            bail!(Fault::CorruptRow {
                reason: format!("row of {} bytes is shorter than the header", bytes.len()),
            });
        }
        let (header, _) = RowHeader::read_from_prefix(&bytes).map_err(|_| Fault::CorruptRow {
            reason: "unreadable row header".into(),
        })?;
        if header.row_len() as usize != bytes.len() {
            bail!(Fault::CorruptRow {
                reason: format!(
                    "row length field {} does not match buffer length {}",
                    header.row_len(),
                    bytes.len()
                ),
            });
        }
        Ok(Self { bytes })
    }

    pub(crate) fn from_built(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn row_def_id(&self) -> u32 {
        match RowHeader::read_from_prefix(&self.bytes) {
            Ok((header, _)) => header.row_def_id(),
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Marks which fields of a partial row image are intentionally bound.
/// Everything else may stay unbound without tripping the value-source-null
/// check; unbound unselected fields encode as NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelector {
    bits: Vec<u64>,
    len: usize,
}

impl ColumnSelector {
    pub fn none(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn all(len: usize) -> Self {
        let mut selector = Self::none(len);
        for i in 0..len {
            selector.select(i);
        }
        selector
    }

    pub fn select(&mut self, idx: usize) {
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    pub fn with(mut self, idx: usize) -> Self {
        self.select(idx);
        self
    }

    pub fn is_selected(&self, idx: usize) -> bool {
        idx < self.len && self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
