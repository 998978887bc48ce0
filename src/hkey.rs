//! # Hierarchical Keys
//!
//! An hkey is the physical address of a row inside its group tree: a
//! concatenation of segments, one per ancestor level plus the row's own,
//! where each segment is the table's one-byte ordinal followed by the
//! order-preserving encodings of that level's key columns.
//!
//! ```text
//! [ord_root][k..] [ord_child][k..] ... [ord_self][k..]
//! ```
//!
//! Because ordinals follow preorder and the value encodings compare
//! bytewise, plain lexicographic order over hkey bytes interleaves every
//! row with its ancestors and lays each subtree out contiguously. The
//! subtree of a row is exactly the key range `[bytes, bytes ++ 0xFF)`,
//! which works because ordinals stay below `0xFF` and every value
//! encoding starts with a type prefix below `0xFF`.
//!
//! Segment boundaries are tracked alongside the bytes so that truncating
//! to an ancestor's key is O(1) and never re-encodes.

use smallvec::SmallVec;

use eyre::{bail, ensure, Result};

use crate::encoding::key::{self, type_prefix};
use crate::error::Fault;
use crate::rowdata::RowView;
use crate::schema::{Group, HKeyMeta, Schema};
use crate::types::Value;

/// The byte appended to a key to form the exclusive upper bound of its
/// subtree range.
pub const SUBTREE_END: u8 = type_prefix::MAX_KEY;

#[derive(Debug, Clone, Default)]
pub struct HKey {
    bytes: Vec<u8>,
    /// Byte offset where each segment begins.
    starts: SmallVec<[u16; 8]>,
}

impl HKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a row's full hkey from its own field values. Every segment is
    /// sourced from the row itself (foreign keys cover the rootward chain),
    /// so no parent lookup is ever needed.
    pub fn from_row(view: &RowView<'_>, meta: &HKeyMeta) -> Result<Self> {
        let mut hkey = Self::new();
        for segment in &meta.segments {
            hkey.extend_with_ordinal(segment.ordinal)?;
            for &field in &segment.fields {
                if view.is_null(field) {
                    bail!(Fault::CorruptRow {
                        reason: format!(
                            "key column {} is NULL",
                            view.layout().qualified(field)
                        ),
                    });
                }
                let value = view.get_value(field)?;
                hkey.extend_with_value(&value);
            }
        }
        Ok(hkey)
    }

    /// Reparse raw key bytes into segments using the group's ordinal map.
    /// Used when a key comes back from the engine without its provenance.
    pub fn from_bytes(schema: &Schema, group: &Group, bytes: Vec<u8>) -> Result<Self> {
        let mut starts = SmallVec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            ensure!(pos <= u16::MAX as usize, "key too long");
            starts.push(pos as u16);
            let ordinal = bytes[pos];
            let Some(table) = group.table_by_ordinal(ordinal) else {
                bail!(Fault::CorruptRow {
                    reason: format!(
                        "key references ordinal {ordinal} unknown to group {}",
                        group.name()
                    ),
                });
            };
            pos += 1;
            for _ in 0..schema.table(table).primary_key().len() {
                pos += key::skip_value(&bytes[pos..])?;
            }
        }
        Ok(Self { bytes, starts })
    }

    /// Open a new segment with the given table ordinal.
    pub fn extend_with_ordinal(&mut self, ordinal: u8) -> Result<()> {
        ensure!(
            ordinal != 0 && ordinal < SUBTREE_END,
            "table ordinal {ordinal} outside the encodable range"
        );
        ensure!(self.bytes.len() <= u16::MAX as usize, "key too long");
        self.starts.push(self.bytes.len() as u16);
        self.bytes.push(ordinal);
        Ok(())
    }

    /// Append one key-column value to the segment opened last.
    pub fn extend_with_value(&mut self, value: &Value) {
        key::encode_value(value, &mut self.bytes);
    }

    /// Append a NULL marker in place of an unknown key column. Used when
    /// widening a partially bound key into a scannable prefix.
    pub fn extend_with_null(&mut self) {
        key::encode_null(&mut self.bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of segments, i.e. the row's depth in the group tree plus one.
    pub fn segment_count(&self) -> usize {
        self.starts.len()
    }

    /// Ordinal byte of segment `i`.
    pub fn ordinal_at(&self, i: usize) -> u8 {
        self.bytes[self.starts[i] as usize]
    }

    /// Ordinal of the deepest segment, identifying the row's own table.
    pub fn leaf_ordinal(&self) -> Option<u8> {
        self.starts.last().map(|&s| self.bytes[s as usize])
    }

    /// The key truncated to its first `n` segments. O(1) on the byte copy
    /// boundary thanks to the recorded segment starts.
    pub fn use_segments(&self, n: usize) -> Self {
        if n >= self.starts.len() {
            return self.clone();
        }
        let end = self.starts[n] as usize;
        Self {
            bytes: self.bytes[..end].to_vec(),
            starts: self.starts[..n].iter().copied().collect(),
        }
    }

    /// True when `self` addresses `other` or one of its ancestors.
    pub fn prefix_of(&self, other: &HKey) -> bool {
        other.bytes.starts_with(&self.bytes)
    }

    /// Exclusive upper bound of this key's subtree: every descendant key
    /// sorts below it, every unrelated key at or above it.
    pub fn subtree_end(&self) -> Vec<u8> {
        let mut end = Vec::with_capacity(self.bytes.len() + 1);
        end.extend_from_slice(&self.bytes);
        end.push(SUBTREE_END);
        end
    }
}

impl PartialEq for HKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for HKey {}

impl PartialOrd for HKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl std::hash::Hash for HKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(segments: &[(u8, &[Value])]) -> HKey {
        let mut hkey = HKey::new();
        for (ordinal, values) in segments {
            hkey.extend_with_ordinal(*ordinal).unwrap();
            for value in *values {
                hkey.extend_with_value(value);
            }
        }
        hkey
    }

    #[test]
    fn ancestors_sort_before_their_descendants() {
        let customer = key_of(&[(1, &[Value::Int64(7)])]);
        let order = key_of(&[(1, &[Value::Int64(7)]), (2, &[Value::Int64(1)])]);
        let next_customer = key_of(&[(1, &[Value::Int64(8)])]);
        assert!(customer < order);
        assert!(order < next_customer);
        assert!(customer.prefix_of(&order));
        assert!(!customer.prefix_of(&next_customer));
    }

    #[test]
    fn subtree_end_bounds_exactly_the_descendants() {
        let customer = key_of(&[(1, &[Value::Int64(7)])]);
        let order = key_of(&[(1, &[Value::Int64(7)]), (2, &[Value::Int64(500)])]);
        let next_customer = key_of(&[(1, &[Value::Int64(8)])]);
        let end = customer.subtree_end();
        assert!(order.as_bytes() < end.as_slice());
        assert!(next_customer.as_bytes() >= end.as_slice());
    }

    #[test]
    fn use_segments_truncates_without_reencoding() {
        let order = key_of(&[
            (1, &[Value::Int64(7), Value::Text("x".into())]),
            (2, &[Value::Int64(1)]),
        ]);
        let customer = order.use_segments(1);
        assert_eq!(customer.segment_count(), 1);
        assert!(customer.prefix_of(&order));
        assert_eq!(
            customer.as_bytes(),
            key_of(&[(1, &[Value::Int64(7), Value::Text("x".into())])]).as_bytes()
        );
        assert_eq!(order.use_segments(5), order);
    }

    #[test]
    fn ordinal_ff_is_rejected() {
        let mut hkey = HKey::new();
        assert!(hkey.extend_with_ordinal(0xFF).is_err());
        assert!(hkey.extend_with_ordinal(0).is_err());
    }

    #[test]
    fn leaf_ordinal_identifies_the_owning_table() {
        let order = key_of(&[(1, &[Value::Int64(7)]), (2, &[Value::Int64(1)])]);
        assert_eq!(order.leaf_ordinal(), Some(2));
        assert_eq!(order.ordinal_at(0), 1);
        assert_eq!(HKey::new().leaf_ordinal(), None);
    }
}
