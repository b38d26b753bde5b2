//! Context handed to running jobs.

use crate::counter::JobHandle;
use crate::dispatcher::Runtime;
use crate::error::DispatchError;
use crate::fiber::FiberId;
use crate::fiber_pool::StackClass;
use crate::job::{JobDesc, JobPriority};
use crate::thread_context::ThreadTag;
use std::sync::Arc;

/// What a job sees of the dispatcher while it runs.
///
/// Dispatching from a job records the new batch on the job's fiber; waiting
/// suspends the fiber, not the thread, and resumes it on the same thread.
pub struct JobContext<'a> {
    runtime: &'a Arc<Runtime>,
    fiber: FiberId,
    thread: Option<ThreadTag>,
    index: usize,
    priority: JobPriority,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(
        runtime: &'a Arc<Runtime>,
        fiber: FiberId,
        thread: Option<ThreadTag>,
        index: usize,
        priority: JobPriority,
    ) -> Self {
        JobContext {
            runtime,
            fiber,
            thread,
            index,
            priority,
        }
    }

    /// Position of this job in the batch it was dispatched with.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    /// Tag of the thread running this job. A job that waits is resumed on the
    /// same thread, so this never changes while the job runs.
    pub fn thread_tag(&self) -> Option<ThreadTag> {
        self.thread
    }

    /// Stack class of the fiber running this job.
    pub fn stack_class(&self) -> StackClass {
        self.fiber.class
    }

    /// Dispatches a nested batch on small-stack fibers.
    pub fn dispatch_small<I>(&self, jobs: I) -> Result<JobHandle, DispatchError>
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.runtime.dispatch(StackClass::Small, jobs)
    }

    /// Dispatches a nested batch on big-stack fibers.
    pub fn dispatch_big<I>(&self, jobs: I) -> Result<JobHandle, DispatchError>
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.runtime.dispatch(StackClass::Big, jobs)
    }

    /// Waits for a nested batch, pumping other fibers on this thread meanwhile.
    pub fn wait(&self, handle: JobHandle) -> Result<(), DispatchError> {
        self.runtime.wait(handle)
    }
}
