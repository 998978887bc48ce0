//! Cursor lifecycle over an operator plan.
//!
//! A [`Cursor`] wraps an executor tree and enforces the state machine
//!
//! ```text
//! Fresh ──next()──▶ Active ──stream ends──▶ Exhausted
//!   │                  │                        │
//!   └──────────────── close() ─────────────────┘──▶ Closed
//! ```
//!
//! `close` is idempotent and implied by drop; `next` after close is a
//! plan fault, not a panic. Cancellation and the query deadline are
//! checked here, once per produced row at the plan root, so deep operator
//! trees pay the check exactly once per row.

use eyre::{bail, Result};

use crate::adapter::Session;
use crate::error::Fault;
use crate::operator::plan::{self, ExecContext, Executor, Operator};
use crate::operator::row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Fresh,
    Active,
    Exhausted,
    Closed,
}

pub struct Cursor<'e> {
    exec: Option<Box<dyn Executor<'e> + 'e>>,
    session: &'e Session,
    state: CursorState,
    rows_produced: u64,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("rows_produced", &self.rows_produced)
            .finish_non_exhaustive()
    }
}

impl<'e> Cursor<'e> {
    /// Validate the plan and open its executor tree.
    pub fn open(op: &'e Operator, cx: ExecContext<'e>) -> Result<Self> {
        op.validate(cx.adapter.schema(), cx.registry)?;
        Ok(Self {
            exec: Some(plan::open(op, cx)?),
            session: cx.adapter.session(),
            state: CursorState::Fresh,
            rows_produced: 0,
        })
    }

    pub fn next(&mut self) -> Result<Option<Row>> {
        let Some(exec) = self.exec.as_mut() else {
            bail!(Fault::InvalidPlan {
                reason: "cursor used after close".into(),
            });
        };
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }
        self.session.check_query_cancelation()?;
        match exec.next()? {
            Some(row) => {
                self.state = CursorState::Active;
                self.rows_produced += 1;
                Ok(Some(row))
            }
            None => {
                self.state = CursorState::Exhausted;
                Ok(None)
            }
        }
    }

    /// Release the executor tree and every resource it holds. Safe to
    /// call any number of times.
    pub fn close(&mut self) {
        self.exec = None;
        self.state = CursorState::Closed;
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn rows_produced(&self) -> u64 {
        self.rows_produced
    }
}
