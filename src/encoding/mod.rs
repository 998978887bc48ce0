//! # Encoding Module
//!
//! Byte-comparable key encoding shared by hierarchical keys, group-index
//! entries, and the sort operator's buffered sort keys. All encoded values
//! preserve their logical order under a plain byte comparison.

pub mod key;

pub use key::type_prefix;
