//! Cross-thread wake-ups for idle pump loops.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Pending-work counter plus the condition variable idle threads park on.
///
/// Every event that can make a parked pump loop able to progress (new or
/// re-listed fibers, a counter reaching zero, shutdown) bumps `epoch` under the
/// mutex. A pump loop reads the epoch before scanning and parks only while it
/// is unchanged, so a wake-up between scan and park is never lost.
pub(crate) struct WorkSignal {
    pending: AtomicUsize,
    epoch: AtomicU64,
    stop: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl WorkSignal {
    pub fn new() -> Self {
        WorkSignal {
            pending: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Listed fibers not yet claimed by any pump loop.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn notify(&self, update: impl FnOnce()) {
        {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            update();
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.cv.notify_all();
    }

    /// `count` fibers were listed.
    pub fn add_pending(&self, count: usize) {
        if count > 0 {
            self.notify(|| {
                self.pending.fetch_add(count, Ordering::AcqRel);
            });
        }
    }

    /// A pump loop claimed one listed fiber.
    pub fn take_pending(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pending count underflow");
    }

    /// Something other than a new listing changed, e.g. a batch drained.
    pub fn wake_all(&self) {
        self.notify(|| {});
    }

    pub fn request_stop(&self) {
        self.notify(|| self.stop.store(true, Ordering::Release));
    }

    /// Parks until the epoch moves past `seen`, the dispatcher stops, or
    /// `timeout` elapses.
    pub fn park(&self, seen: u64, timeout: Duration) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .cv
            .wait_timeout_while(guard, timeout, |_| {
                self.epoch() == seen && !self.is_stopping()
            })
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_pending_accounting() {
        let signal = WorkSignal::new();
        let epoch = signal.epoch();
        signal.add_pending(3);
        assert_eq!(signal.pending(), 3);
        assert!(signal.epoch() > epoch);

        signal.take_pending();
        assert_eq!(signal.pending(), 2);
    }

    #[test]
    fn test_park_returns_when_epoch_already_moved() {
        let signal = WorkSignal::new();
        let seen = signal.epoch();
        signal.wake_all();

        let start = Instant::now();
        signal.park(seen, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_wakes_parked_thread() {
        let signal = Arc::new(WorkSignal::new());
        let seen = signal.epoch();
        let parked = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.park(seen, Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        signal.request_stop();
        parked.join().unwrap();
        assert!(signal.is_stopping());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
