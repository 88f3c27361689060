//! One-shot broadcast signals shared between pipeline threads.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Flag that transitions once from unfired to fired and wakes every waiter.
///
/// Firing is idempotent; only the first call reports a transition.
#[derive(Debug, Default)]
pub struct Signal {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    /// Creates an unfired signal.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fired: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Fires the signal. Returns true if this call performed the transition.
    pub fn fire(&self) -> bool {
        let mut fired = self.lock();
        if *fired {
            return false;
        }
        *fired = true;
        self.condvar.notify_all();
        true
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.lock()
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let guard = self.lock();
        let _fired = self
            .condvar
            .wait_while(guard, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks for at most `timeout`. Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (fired, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
        *fired
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
