use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters describing what the dispatcher has done since `init`.
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Batches that returned a handle.
    pub batches_dispatched: AtomicU64,
    /// Jobs that got a fiber and were listed.
    pub jobs_dispatched: AtomicU64,
    /// Jobs whose callback returned (or panicked).
    pub jobs_completed: AtomicU64,
    /// Jobs skipped or refused because their fiber pool was empty.
    pub jobs_rejected: AtomicU64,
    /// Jobs whose callback panicked.
    pub job_panics: AtomicU64,
    /// Waits that found their counter already at zero.
    pub waits_fast: AtomicU64,
    /// Waits that had to pump other fibers.
    pub waits_suspended: AtomicU64,
    /// Waits refused because the thread ran out of pump stacks.
    pub wait_stack_exhausted: AtomicU64,
    pub start_time: Instant,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            batches_dispatched: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            job_panics: AtomicU64::new(0),
            waits_fast: AtomicU64::new(0),
            waits_suspended: AtomicU64::new(0),
            wait_stack_exhausted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            job_panics: self.job_panics.load(Ordering::Relaxed),
            waits_fast: self.waits_fast.load(Ordering::Relaxed),
            waits_suspended: self.waits_suspended.load(Ordering::Relaxed),
            wait_stack_exhausted: self.wait_stack_exhausted.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub batches_dispatched: u64,
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_rejected: u64,
    pub job_panics: u64,
    pub waits_fast: u64,
    pub waits_suspended: u64,
    pub wait_stack_exhausted: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Jobs listed but not finished yet.
    pub fn jobs_in_flight(&self) -> u64 {
        self.jobs_dispatched.saturating_sub(self.jobs_completed)
    }

    /// Completed jobs per second since `init`.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}
