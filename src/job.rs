//! Job definitions.
//!
//! A job is a unit of work handed to the dispatcher. It carries the closure to
//! run and the priority class the scheduler scans it under.

use crate::context::JobContext;
use serde::{Deserialize, Serialize};

/// Scheduling tier. Classes are scanned in declaration order, so a ready
/// `High` fiber is always picked before a ready `Normal` or `Low` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Number of priority classes.
    pub const COUNT: usize = 3;

    /// All classes in scan order.
    pub const ALL: [JobPriority; Self::COUNT] =
        [JobPriority::High, JobPriority::Normal, JobPriority::Low];

    /// Position of this class in the scan order.
    pub fn index(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

pub(crate) type JobFn = Box<dyn FnOnce(&JobContext<'_>) + Send + 'static>;

/// A unit of work to be dispatched.
///
/// The closure receives a [`JobContext`] that exposes its index inside the
/// batch and lets it dispatch and wait on nested batches.
pub struct JobDesc {
    pub(crate) work: JobFn,
    pub(crate) priority: JobPriority,
}

impl JobDesc {
    /// Creates a job with the given priority.
    pub fn new<F>(priority: JobPriority, work: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        JobDesc {
            work: Box::new(work),
            priority,
        }
    }

    /// Creates a job with [`JobPriority::Normal`].
    pub fn normal<F>(work: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        Self::new(JobPriority::Normal, work)
    }

    /// Returns the job with its priority replaced.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }
}

impl std::fmt::Debug for JobDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDesc")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
