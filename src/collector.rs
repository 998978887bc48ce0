//! # Row Collector
//!
//! Batches cursor output into fixed-capacity buffers for handing rows
//! across an API boundary in bulk. The collector owns the cursor; the
//! caller owns the [`ScanBuffer`] and drains it between fills. A row that
//! does not fit the space left in the current buffer is carried over and
//! leads the next one; a row larger than an empty buffer can never be
//! delivered and faults instead of looping.

use eyre::{bail, ensure, Result};

use crate::error::Fault;
use crate::operator::{Cursor, Row};

/// Validated description of one collection run. Both endpoints of a scan
/// must agree on the row definition they expect.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest {
    row_def_id: u32,
}

impl ScanRequest {
    pub fn new(start_row_def: u32, end_row_def: u32) -> Result<Self> {
        if start_row_def != end_row_def {
            bail!(Fault::MismatchedRowDefinitions {
                start: start_row_def,
                end: end_row_def,
            });
        }
        Ok(Self {
            row_def_id: start_row_def,
        })
    }

    pub fn row_def_id(&self) -> u32 {
        self.row_def_id
    }
}

/// Length-prefixed row images, filled front to back.
pub struct ScanBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    rows: usize,
}

impl ScanBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            rows: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
        self.rows = 0;
    }

    fn push(&mut self, row: &[u8]) {
        self.bytes.extend_from_slice(row);
        self.rows += 1;
    }
}

pub struct RowCollector<'e> {
    request: ScanRequest,
    cursor: Cursor<'e>,
    /// Row pulled for a full buffer, delivered first into the next one.
    pending: Option<Row>,
    finished: bool,
}

impl<'e> RowCollector<'e> {
    pub fn new(request: ScanRequest, cursor: Cursor<'e>) -> Self {
        Self {
            request,
            cursor,
            pending: None,
            finished: false,
        }
    }

    /// Append the next row to `buffer`. Returns `false` without
    /// appending when the stream is exhausted or the row does not fit
    /// the buffer's remaining space; [`Self::finished`] tells the two
    /// apart.
    pub fn collect_next_row(&mut self, buffer: &mut ScanBuffer) -> Result<bool> {
        let row = match self.pending.take() {
            Some(row) => row,
            None => match self.cursor.next()? {
                Some(row) => row,
                None => {
                    self.finished = true;
                    return Ok(false);
                }
            },
        };
        let image = row.data().as_bytes();
        ensure!(
            row.data().row_def_id() == self.request.row_def_id(),
            Fault::MismatchedRowDefinitions {
                start: self.request.row_def_id(),
                end: row.data().row_def_id(),
            }
        );
        if image.len() > buffer.capacity() {
            bail!(Fault::RowTooLargeForBuffer {
                row: image.len(),
                capacity: buffer.capacity(),
            });
        }
        if image.len() > buffer.remaining() {
            self.pending = Some(row);
            return Ok(false);
        }
        buffer.push(image);
        Ok(true)
    }

    /// Fill `buffer` until it has no room for the next row or the stream
    /// ends; returns the number of rows appended.
    pub fn fill(&mut self, buffer: &mut ScanBuffer) -> Result<usize> {
        let before = buffer.rows();
        while self.collect_next_row(buffer)? {}
        Ok(buffer.rows() - before)
    }

    pub fn finished(&self) -> bool {
        self.finished && self.pending.is_none()
    }

    pub fn into_cursor(self) -> Cursor<'e> {
        self.cursor
    }
}
