//! Pooled key/value scratch buffers.
//!
//! Every operator that materializes keys or row images borrows an
//! [`Exchange`] from the session's pool instead of allocating. The pool is
//! bounded; a plan that forgets to return exchanges exhausts it and fails
//! loudly, which is the point. Returns happen through the guard's `Drop`,
//! so early exits and error paths pay nothing extra.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use eyre::{bail, Result};
use parking_lot::Mutex;

use crate::error::Fault;

/// Reusable key and value buffers. Cleared on return, capacity retained.
#[derive(Debug, Default)]
pub struct Exchange {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub struct ExchangePool {
    free: Mutex<Vec<Exchange>>,
    capacity: usize,
    outstanding: AtomicUsize,
    takes: AtomicU64,
    returns: AtomicU64,
}

impl ExchangePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            outstanding: AtomicUsize::new(0),
            takes: AtomicU64::new(0),
            returns: AtomicU64::new(0),
        }
    }

    pub fn take(&self) -> Result<ExchangeGuard<'_>> {
        let exchange = match self.free.lock().pop() {
            Some(exchange) => exchange,
            None => {
                if self.outstanding.load(Ordering::SeqCst) >= self.capacity {
                    bail!(Fault::Store {
                        reason: format!(
                            "exchange pool exhausted ({} outstanding)",
                            self.capacity
                        ),
                    });
                }
                Exchange::default()
            }
        };
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.takes.fetch_add(1, Ordering::SeqCst);
        Ok(ExchangeGuard {
            pool: self,
            exchange,
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn takes(&self) -> u64 {
        self.takes.load(Ordering::SeqCst)
    }

    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::SeqCst)
    }
}

pub struct ExchangeGuard<'p> {
    pool: &'p ExchangePool,
    exchange: Exchange,
}

impl std::fmt::Debug for ExchangeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeGuard")
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl Deref for ExchangeGuard<'_> {
    type Target = Exchange;

    fn deref(&self) -> &Exchange {
        &self.exchange
    }
}

impl DerefMut for ExchangeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Exchange {
        &mut self.exchange
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        let mut exchange = std::mem::take(&mut self.exchange);
        exchange.key.clear();
        exchange.value.clear();
        self.pool.free.lock().push(exchange);
        self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.pool.returns.fetch_add(1, Ordering::SeqCst);
    }
}
