use log::trace;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A single-slot hand-off between the reader thread and a waiting caller.
///
/// The producer stores a value with [`Signal::notify`], replacing any value that
/// was not collected yet. A consumer takes it with [`Signal::wait_timeout`]. Every
/// value is delivered at most once; a slow consumer only ever sees the latest one.
///
/// # Example
/// ```
/// # use nvilidar::base::Signal;
/// # use std::time::Duration;
/// let signal = Signal::new();
/// signal.notify(7u32);
/// assert_eq!(signal.wait_timeout(Duration::from_millis(1)), Some(7));
/// assert_eq!(signal.wait_timeout(Duration::from_millis(1)), None);
/// ```
#[derive(Debug)]
pub struct Signal<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Signal<T> {
    /// Creates an empty signal.
    pub fn new() -> Signal<T> {
        Signal {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    // A panicking consumer cannot leave the slot half-written, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value` and wakes one waiter.
    pub fn notify(&self, value: T) {
        let mut slot = self.lock();
        if slot.is_some() {
            trace!("Signal overwrites an uncollected value");
        }
        *slot = Some(value);
        self.cond.notify_one();
    }

    /// Drops any value that has not been collected yet and returns it.
    ///
    /// Callers clear the slot before issuing a request so that a stale answer
    /// cannot satisfy the following wait.
    pub fn reset(&self) -> Option<T> {
        self.lock().take()
    }

    /// Waits up to `timeout` for a value and takes it.
    ///
    /// Returns `None` on timeout. The wait never lasts materially longer than
    /// `timeout`, spurious wake-ups included.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut guard, result) = self
            .cond
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && guard.is_none() {
            trace!("Signal wait timed out after {:?}", timeout);
            return None;
        }
        guard.take()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Signal;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_returns_none_within_timeout() {
        let signal: Signal<u8> = Signal::new();
        let start = Instant::now();
        assert_eq!(signal.wait_timeout(Duration::from_millis(50)), None);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "waited {:?}", elapsed);
    }

    #[test]
    fn notify_wakes_waiter_on_other_thread() {
        let signal = Arc::new(Signal::new());
        let producer = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.notify(42u32);
        });
        assert_eq!(signal.wait_timeout(Duration::from_secs(2)), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn latest_value_wins_and_is_delivered_once() {
        let signal = Signal::new();
        signal.notify(1);
        signal.notify(2);
        assert_eq!(signal.wait_timeout(Duration::from_millis(1)), Some(2));
        assert_eq!(signal.wait_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn reset_discards_pending_value() {
        let signal = Signal::new();
        signal.notify("stale");
        assert_eq!(signal.reset(), Some("stale"));
        assert_eq!(signal.wait_timeout(Duration::from_millis(5)), None);
    }
}
