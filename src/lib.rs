//! # ArborDB - Hierarchical Relational Storage Tier
//!
//! ArborDB is the storage-adapter tier of a hierarchical relational
//! database: tables form trees inside groups, every row's physical
//! address is a composite hierarchical key, and group trees plus their
//! secondary indexes live in an ordered transactional KV engine. This
//! Rust implementation prioritizes:
//!
//! - **Order-preserving keys**: hkeys compare bytewise, so ancestors,
//!   descendants, and siblings interleave correctly in plain key order
//! - **Self-maintaining indexes**: every base-row mutation derives the
//!   exact group-index deltas, equal to a bulk rebuild
//! - **Zero-copy reads**: row images are fixed-layout byte slices read
//!   in place through typed views
//!
//! ## Quick Start
//!
//! ```ignore
//! use arbordb::{MemoryStore, OperatorStore, Session, StoreConfig};
//!
//! let store = OperatorStore::new(MemoryStore::new(), schema, StoreConfig::new());
//! let session = Session::new(store.config());
//!
//! store.transactionally(&session, |cx| {
//!     let hkey = cx.write_row(customers, &row)?;
//!     Ok(hkey)
//! })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │    OperatorStore / TxnContext        │
//! ├──────────────────────────────────────┤
//! │ Operator Plans │ Index Maintenance   │
//! ├────────────────┴─────────────────────┤
//! │   StoreAdapter (rows ⇄ trees)        │
//! ├──────────────────────────────────────┤
//! │   RowData codec │ HKey encoding      │
//! ├──────────────────────────────────────┤
//! │   Ordered KV engine (TreeStore)      │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`rowdata`]: binary row codec (header, null bitmap, fixed and
//!   variable areas)
//! - [`encoding`]: order-preserving key encodings for every field type
//! - [`hkey`]: hierarchical composite keys and subtree ranges
//! - [`schema`]: tables, groups, group indexes, hkey metadata
//! - [`engine`]: the KV engine boundary plus an in-memory reference
//!   implementation
//! - [`adapter`]: per-transaction row operations, sessions, exchanges
//! - [`operator`]: pull-based plan execution over groups and indexes
//! - [`store`]: transactions with retry, plan cache, incremental index
//!   maintenance
//! - [`collector`]: batching cursor output into fixed-size buffers

mod macros;

pub mod adapter;
pub mod collector;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod hkey;
pub mod operator;
pub mod rowdata;
pub mod schema;
pub mod store;
pub mod types;

pub use adapter::{Session, StoreAdapter, StoreStats};
pub use collector::{RowCollector, ScanBuffer, ScanRequest};
pub use config::StoreConfig;
pub use engine::{MemoryStore, StoreTxn, TreeCursor, TreeEntry, TreeId, TreeStore, TxnGuard};
pub use error::{Fault, FaultKind};
pub use hkey::HKey;
pub use operator::{BindValue, Cursor, CursorState, Operator, Row, RowTypeRegistry};
pub use rowdata::{RowBuilder, RowData, RowView};
pub use schema::{Schema, SchemaBuilder};
pub use store::{OperatorStore, TxnContext};
pub use types::{Charset, FieldType, Value};

/// Log target used by every module in the crate.
pub const LOG_TARGET: &str = "arbordb";
