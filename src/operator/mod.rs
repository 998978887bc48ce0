//! # Operator Framework
//!
//! Pull-based execution over group trees and group indexes. A plan is a
//! tree of [`Operator`] nodes; a [`Cursor`] opened over it streams
//! [`Row`]s whose shapes are named by the [`RowTypeRegistry`].
//!
//! The framework is deliberately small: scans, hkey-directed lookups,
//! flattening, and the shape/limit/sort plumbing around them. Everything
//! higher level, including index maintenance plans, composes these nodes.

pub mod cursor;
pub mod plan;
pub mod row;

pub use cursor::{Cursor, CursorState};
pub use plan::{BindValue, ExecContext, IndexRange, Operator, ScanBound, SortKey};
pub use row::{flatten_rows, Row, RowType, RowTypeId, RowTypeRegistry};
