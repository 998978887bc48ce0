//! # Store Configuration
//!
//! Engineering tunables for the storage adapter, carried as a plain value
//! that is cheap to clone into every component that needs it. The retry
//! bound and cancellation-check granularity are parameters, not contractual
//! values; the defaults match what the rest of the system assumes.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    txn_retries: usize,
    query_timeout: Option<Duration>,
    scan_buffer_capacity: usize,
    exchange_pool_capacity: usize,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            txn_retries: 10,
            query_timeout: None,
            scan_buffer_capacity: 64 * 1024,
            exchange_pool_capacity: 16,
        }
    }

    /// Bound on whole-transaction retries after an optimistic-concurrency
    /// rollback. Exceeding it surfaces the conflict to the caller.
    pub fn with_txn_retries(mut self, retries: usize) -> Self {
        self.txn_retries = retries;
        self
    }

    /// Wall-clock budget for a single query; `None` disables the check.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Capacity of the fixed-size buffers handed to the legacy collector.
    pub fn with_scan_buffer_capacity(mut self, capacity: usize) -> Self {
        self.scan_buffer_capacity = capacity;
        self
    }

    /// Bound on pooled exchange handles per session.
    pub fn with_exchange_pool_capacity(mut self, capacity: usize) -> Self {
        self.exchange_pool_capacity = capacity;
        self
    }

    pub fn txn_retries(&self) -> usize {
        self.txn_retries
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    pub fn scan_buffer_capacity(&self) -> usize {
        self.scan_buffer_capacity
    }

    pub fn exchange_pool_capacity(&self) -> usize {
        self.exchange_pool_capacity
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
