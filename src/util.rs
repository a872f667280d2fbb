#[cfg(not(feature = "loom"))]
use crate::error::WaitTimeoutError;
use crate::sync::{AtomicUsize, Condvar, Mutex, Ordering};

/// Atomically lowers `target` to `value` if `value` is smaller.
///
/// Lock-free compare-exchange loop. A successful store uses `AcqRel` so the
/// write is published to peers that subsequently read the cell; the failure
/// ordering is `Relaxed` because a stale observation only retries.
pub fn atomic_min(target: &AtomicUsize, value: usize) {
    let mut current = target.load(Ordering::Relaxed);
    while value < current {
        match target.compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// A write-once publication cell.
///
/// The parallel algorithm finalizers publish their answer here exactly once;
/// callers block on [`wait`](Self::wait) (or [`wait_timeout`](Self::wait_timeout))
/// until the value lands. Publication happens-before observation via the
/// internal mutex.
#[derive(Debug)]
pub struct ResultSlot<T> {
    value: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            cond: Condvar::new(),
        }
    }
}

impl<T: Clone> ResultSlot<T> {

    /// Publishes `value` and wakes all waiters.
    ///
    /// The first publication wins; a second call is a finalizer protocol
    /// violation and is ignored outside debug builds.
    pub fn set(&self, value: T) {
        let mut slot = self.value.lock().expect("ResultSlot::set: poisoned");
        debug_assert!(slot.is_none(), "result published twice");
        if slot.is_none() {
            *slot = Some(value);
        }
        drop(slot);
        self.cond.notify_all();
    }

    /// Returns the published value, if any, without blocking.
    pub fn try_get(&self) -> Option<T> {
        self.value
            .lock()
            .expect("ResultSlot::try_get: poisoned")
            .clone()
    }

    /// Blocks until a value is published and returns it.
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock().expect("ResultSlot::wait: poisoned");
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .cond
                .wait(slot)
                .expect("ResultSlot::wait: poisoned");
        }
    }

    /// Blocks until a value is published or `timeout` elapses.
    #[cfg(not(feature = "loom"))]
    pub fn wait_timeout(&self, timeout: core::time::Duration) -> Result<T, WaitTimeoutError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = self
            .value
            .lock()
            .expect("ResultSlot::wait_timeout: poisoned");
        loop {
            if let Some(value) = slot.as_ref() {
                return Ok(value.clone());
            }
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()).filter(|d| !d.is_zero()) else {
                return Err(WaitTimeoutError { timeout });
            };
            let (guard, _) = self
                .cond
                .wait_timeout(slot, remaining)
                .expect("ResultSlot::wait_timeout: poisoned");
            slot = guard;
        }
    }
}
