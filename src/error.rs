//! # Fault Taxonomy
//!
//! Every failure this tier can report is one of a small number of typed
//! faults, and every fault belongs to exactly one kind. Callers decide how to
//! react by kind rather than by message text:
//!
//! | Kind          | Reaction                                              |
//! |---------------|-------------------------------------------------------|
//! | Encoding      | Non-retryable, reported immediately                   |
//! | Resource      | Cancellation/timeout, or a generic storage fault      |
//! | Concurrency   | Retried locally up to a bound, then abandoned         |
//! | Cardinality   | Never retried; signals an upstream key-construction bug |
//! | Configuration | Rejected synchronously at call time                   |
//!
//! Faults travel inside `eyre::Report` (the crate's result spine). A caller
//! that needs the type back downcasts:
//!
//! ```ignore
//! match arbordb::error::fault_of(&report) {
//!     Some(f) if f.kind() == FaultKind::Concurrency => retry(),
//!     _ => abort(report),
//! }
//! ```
//!
//! Engine errors are normalized at the adapter boundary: anything that is not
//! a cancellation or a timeout becomes `Fault::Store`. Operator code depends
//! on nothing more specific than that.

use thiserror::Error;

/// Classification used by callers to choose retry/abort/report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Encoding,
    Resource,
    Concurrency,
    Cardinality,
    Configuration,
}

#[derive(Debug, Error)]
pub enum Fault {
    // -- encoding ---------------------------------------------------------
    #[error("value out of range: {what}")]
    ValueOutOfRange { what: String },

    #[error("unsupported character encoding {charset:?} declared for {column}")]
    UnsupportedCharset { column: String, charset: String },

    #[error("value source is null for {column}")]
    ValueSourceNull { column: String },

    #[error("string of {len} bytes exceeds declared maximum {max} for {column}")]
    StringTooLong { column: String, len: usize, max: usize },

    #[error("corrupt row: {reason}")]
    CorruptRow { reason: String },

    // -- resource ---------------------------------------------------------
    #[error("query canceled")]
    QueryCanceled,

    #[error("query timed out")]
    QueryTimedOut,

    #[error("storage fault: {reason}")]
    Store { reason: String },

    // -- concurrency ------------------------------------------------------
    #[error("transaction conflict")]
    TransactionConflict,

    // -- cardinality ------------------------------------------------------
    #[error("no rows updated")]
    NoRowsUpdated,

    #[error("too many rows updated: {touched} rows matched")]
    TooManyRowsUpdated { touched: usize },

    #[error("duplicate row for key {key}")]
    DuplicateRow { key: String },

    #[error("no such row")]
    NoSuchRow,

    // -- configuration ----------------------------------------------------
    #[error("group index {index} may not be unique")]
    UniqueGroupIndex { index: String },

    #[error("scan start row definition {start} does not match end row definition {end}")]
    MismatchedRowDefinitions { start: u32, end: u32 },

    #[error("invalid plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("row of {row} bytes exceeds scan buffer capacity {capacity}")]
    RowTooLargeForBuffer { row: usize, capacity: usize },

    #[error("unknown table {name}")]
    UnknownTable { name: String },

    #[error("unknown index {name}")]
    UnknownIndex { name: String },
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::ValueOutOfRange { .. }
            | Fault::UnsupportedCharset { .. }
            | Fault::ValueSourceNull { .. }
            | Fault::StringTooLong { .. }
            | Fault::CorruptRow { .. } => FaultKind::Encoding,

            Fault::QueryCanceled | Fault::QueryTimedOut | Fault::Store { .. } => {
                FaultKind::Resource
            }

            Fault::TransactionConflict => FaultKind::Concurrency,

            Fault::NoRowsUpdated
            | Fault::TooManyRowsUpdated { .. }
            | Fault::DuplicateRow { .. }
            | Fault::NoSuchRow => FaultKind::Cardinality,

            Fault::UniqueGroupIndex { .. }
            | Fault::MismatchedRowDefinitions { .. }
            | Fault::InvalidPlan { .. }
            | Fault::RowTooLargeForBuffer { .. }
            | Fault::UnknownTable { .. }
            | Fault::UnknownIndex { .. } => FaultKind::Configuration,
        }
    }

    /// True when a bounded whole-transaction retry is the right reaction.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FaultKind::Concurrency
    }
}

/// Extracts the typed fault from a report, if it carries one.
pub fn fault_of(report: &eyre::Report) -> Option<&Fault> {
    report.downcast_ref::<Fault>()
}

/// True when the report is an optimistic-concurrency rollback.
pub fn is_conflict(report: &eyre::Report) -> bool {
    matches!(fault_of(report), Some(Fault::TransactionConflict))
}
