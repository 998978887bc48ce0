//! Per-session execution state: cancellation, the query deadline, the
//! update-step counter, and the exchange pool.
//!
//! ## Update Steps
//!
//! Each mutation statement inside a transaction runs under its own update
//! step, entered through [`Session::enter_update_step`]. Writes are tagged
//! with the step they happen under, and a driving scan opened for a step
//! sees only writes from strictly earlier steps. That is what stops an
//! INSERT..SELECT style statement from scanning its own output.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use eyre::{bail, Result};

use crate::adapter::exchange::ExchangePool;
use crate::config::StoreConfig;
use crate::error::Fault;

pub struct Session {
    start: Instant,
    cancel: AtomicBool,
    timeout: Option<Duration>,
    step: AtomicU64,
    active_steps: AtomicUsize,
    exchanges: ExchangePool,
}

impl Session {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            start: Instant::now(),
            cancel: AtomicBool::new(false),
            timeout: config.query_timeout(),
            step: AtomicU64::new(0),
            active_steps: AtomicUsize::new(0),
            exchanges: ExchangePool::new(config.exchange_pool_capacity()),
        }
    }

    /// Request cancellation; the running query notices at its next row
    /// boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Checked once per produced row at the plan root. Cancellation wins
    /// over timeout when both apply.
    pub fn check_query_cancelation(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            bail!(Fault::QueryCanceled);
        }
        if let Some(timeout) = self.timeout {
            if self.start.elapsed() > timeout {
                bail!(Fault::QueryTimedOut);
            }
        }
        Ok(())
    }

    /// The step the most recent mutation statement runs under.
    pub fn current_step(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Step a cursor opened right now should use as its visibility
    /// horizon: everything before the statement currently in flight.
    pub fn visible_step(&self) -> u64 {
        let current = self.step.load(Ordering::SeqCst);
        if self.active_steps.load(Ordering::SeqCst) > 0 {
            current.saturating_sub(1)
        } else {
            current
        }
    }

    pub fn enter_update_step(&self) -> UpdateStepGuard<'_> {
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_steps.fetch_add(1, Ordering::SeqCst);
        UpdateStepGuard {
            session: self,
            step,
        }
    }

    pub fn exchanges(&self) -> &ExchangePool {
        &self.exchanges
    }
}

/// Scopes one mutation statement. Writes use [`UpdateStepGuard::step`];
/// dropping the guard marks the statement finished, after which new
/// cursors see its writes.
pub struct UpdateStepGuard<'s> {
    session: &'s Session,
    step: u64,
}

impl UpdateStepGuard<'_> {
    pub fn step(&self) -> u64 {
        self.step
    }
}

impl Drop for UpdateStepGuard<'_> {
    fn drop(&mut self) {
        self.session.active_steps.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::fault_of;

    #[test]
    fn canceled_session_fails_the_check() {
        let session = Session::new(&StoreConfig::new());
        session.check_query_cancelation().unwrap();
        session.cancel();
        let err = session.check_query_cancelation().unwrap_err();
        assert!(matches!(fault_of(&err), Some(Fault::QueryCanceled)));
    }

    #[test]
    fn elapsed_timeout_fails_the_check() {
        let config = StoreConfig::new().with_query_timeout(Duration::from_nanos(1));
        let session = Session::new(&config);
        std::thread::sleep(Duration::from_millis(2));
        let err = session.check_query_cancelation().unwrap_err();
        assert!(matches!(fault_of(&err), Some(Fault::QueryTimedOut)));
    }

    #[test]
    fn scans_inside_a_step_see_only_earlier_steps() {
        let session = Session::new(&StoreConfig::new());
        assert_eq!(session.visible_step(), 0);
        {
            let step = session.enter_update_step();
            assert_eq!(step.step(), 1);
            // The statement's driving scan must not see step 1 writes.
            assert_eq!(session.visible_step(), 0);
        }
        // Statement done; a later scan sees its writes.
        assert_eq!(session.visible_step(), 1);
        let step = session.enter_update_step();
        assert_eq!(step.step(), 2);
        assert_eq!(session.visible_step(), 1);
    }
}
