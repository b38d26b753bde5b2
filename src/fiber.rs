//! Fiber records and the coroutine they run on.
//!
//! This module and the pump-stack helper in `thread_context` are the only
//! places that switch machine stacks; both go through `corosensei`.
//!
//! Every fiber owns one coroutine whose body is a trampoline: it runs one job
//! per activation, yields back to the pump loop that resumed it, and waits for
//! the next activation. The coroutine is created once, when the pool is built,
//! and lives until the pool is torn down.

use crate::counter::JobHandle;
use crate::dispatcher::Runtime;
use crate::fiber_pool::StackClass;
use crate::job::{JobFn, JobPriority};
use crate::thread_context::ThreadTag;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Stable handle of a fiber inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId {
    pub(crate) class: StackClass,
    pub(crate) index: u16,
}

/// Lifecycle state. A fiber is in exactly one of these at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// In its pool's free-list.
    Free = 0,
    /// In a priority wait list, either fresh or waiting to resume.
    Listed = 1,
    /// Executing on some thread.
    Running = 2,
}

impl FiberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FiberState::Free,
            1 => FiberState::Listed,
            _ => FiberState::Running,
        }
    }
}

/// Which threads may resume a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberOwner {
    /// Any pump loop may pick it up.
    Unowned,
    /// Suspended in a nested wait; only this thread may resume it.
    Pinned(ThreadTag),
}

impl FiberOwner {
    fn to_bits(self) -> u32 {
        match self {
            FiberOwner::Unowned => 0,
            FiberOwner::Pinned(tag) => tag.get(),
        }
    }

    fn from_bits(bits: u32) -> Self {
        match NonZeroU32::new(bits) {
            None => FiberOwner::Unowned,
            Some(tag) => FiberOwner::Pinned(ThreadTag::from_raw(tag)),
        }
    }

    /// True if a pump loop on `thread` may resume the fiber.
    pub fn admits(self, thread: ThreadTag) -> bool {
        match self {
            FiberOwner::Unowned => true,
            FiberOwner::Pinned(owner) => owner == thread,
        }
    }
}

const NO_DEPENDENCY: u64 = u64::MAX;

/// Scheduling metadata of a fiber.
///
/// Kept outside the fiber body so the scheduler and the fiber's own `wait`
/// can read and update it while the body is borrowed by the pump loop that is
/// running it.
pub(crate) struct FiberHeader {
    state: AtomicU8,
    owner: AtomicU32,
    priority: AtomicU8,
    wait_dependency: AtomicU64,
    dependency_runtime: AtomicU32,
}

impl FiberHeader {
    pub fn new() -> Self {
        FiberHeader {
            state: AtomicU8::new(FiberState::Free as u8),
            owner: AtomicU32::new(0),
            priority: AtomicU8::new(JobPriority::Normal.index() as u8),
            wait_dependency: AtomicU64::new(NO_DEPENDENCY),
            dependency_runtime: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the fiber from `from` to `to`. Returns false if it was not in `from`.
    pub fn transition(&self, from: FiberState, to: FiberState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn owner(&self) -> FiberOwner {
        FiberOwner::from_bits(self.owner.load(Ordering::Acquire))
    }

    pub fn priority(&self) -> JobPriority {
        JobPriority::ALL[self.priority.load(Ordering::Relaxed) as usize]
    }

    pub fn wait_dependency(&self) -> Option<JobHandle> {
        let bits = self.wait_dependency.load(Ordering::Acquire);
        JobHandle::from_bits(self.dependency_runtime.load(Ordering::Relaxed), bits)
    }

    pub fn set_wait_dependency(&self, handle: Option<JobHandle>) {
        if let Some(handle) = handle {
            self.dependency_runtime.store(handle.runtime(), Ordering::Relaxed);
        }
        let bits = handle.map_or(NO_DEPENDENCY, JobHandle::to_bits);
        self.wait_dependency.store(bits, Ordering::Release);
    }

    /// Resets scheduling metadata for a freshly dispatched job.
    pub fn reset(&self, priority: JobPriority) {
        self.priority.store(priority.index() as u8, Ordering::Relaxed);
        self.owner.store(0, Ordering::Release);
        self.set_wait_dependency(None);
    }

    /// Running fiber enters a nested wait: pin it to `thread` until `dependency`
    /// drains.
    pub fn pin(&self, thread: ThreadTag, dependency: JobHandle) {
        self.set_wait_dependency(Some(dependency));
        self.owner
            .store(FiberOwner::Pinned(thread).to_bits(), Ordering::Release);
    }

    /// Pinned fiber was picked back up by its own thread.
    pub fn unpin(&self) {
        self.owner.store(0, Ordering::Release);
        self.set_wait_dependency(None);
    }
}

/// Everything a fiber needs to run one job.
pub(crate) struct Activation {
    pub runtime: Arc<Runtime>,
    pub fiber: FiberId,
    pub job: JobFn,
    pub index: usize,
    pub priority: JobPriority,
    pub batch: JobHandle,
}

pub(crate) enum FiberInput {
    Run(Activation),
    Retire,
}

/// Outcome of resuming a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberExit {
    /// The job returned; the fiber is ready to go back to its pool. Carries
    /// the batch whose counter still has to be decremented.
    Completed(JobHandle),
    /// The fiber had nothing staged.
    Idle,
}

struct Staged {
    job: JobFn,
    index: usize,
    batch: JobHandle,
}

type FiberCoroutine = Coroutine<FiberInput, JobHandle, (), DefaultStack>;

/// A reusable coroutine record.
pub(crate) struct Fiber {
    coroutine: FiberCoroutine,
    staged: Option<Staged>,
}

// Coroutines are resumed on whichever thread claims the fiber. A started
// coroutine is only ever suspended at the trampoline's yield point, where its
// stack holds no thread-affine state; fibers suspended mid-job stay pinned.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Builds a fiber whose trampoline runs on `stack`.
    pub fn new(stack: DefaultStack) -> Self {
        let coroutine = Coroutine::with_stack(stack, trampoline);
        Fiber {
            coroutine,
            staged: None,
        }
    }

    /// Stages the next job. The fiber must be idle.
    pub fn prepare(&mut self, job: JobFn, index: usize, batch: JobHandle) {
        debug_assert!(self.staged.is_none(), "fiber already has a staged job");
        self.staged = Some(Staged { job, index, batch });
    }

    /// Runs the staged job to completion on the current thread.
    ///
    /// Returns once the job's closure has returned. The batch counter is left
    /// untouched so the caller can free the fiber before a waiter sees it. Nested waits inside the
    /// job run their own pump loops on top of this fiber's stack and do not
    /// come back here until the job is finished.
    pub fn resume(&mut self, runtime: &Arc<Runtime>, id: FiberId, priority: JobPriority) -> FiberExit {
        let Some(staged) = self.staged.take() else {
            return FiberExit::Idle;
        };
        let activation = Activation {
            runtime: Arc::clone(runtime),
            fiber: id,
            job: staged.job,
            index: staged.index,
            priority,
            batch: staged.batch,
        };
        match self.coroutine.resume(FiberInput::Run(activation)) {
            CoroutineResult::Yield(batch) => FiberExit::Completed(batch),
            CoroutineResult::Return(()) => unreachable!("trampoline returned while running a job"),
        }
    }

    /// Stops the trampoline and hands the stack back.
    pub fn retire(mut self) -> DefaultStack {
        // An unstarted trampoline is entered with Retire and returns at once,
        // which leaves the coroutine done either way.
        if !self.coroutine.done() {
            if let CoroutineResult::Yield(_) = self.coroutine.resume(FiberInput::Retire) {
                unreachable!("trampoline yielded while retiring");
            }
        }
        self.coroutine.into_stack()
    }
}

fn trampoline(yielder: &Yielder<FiberInput, JobHandle>, mut input: FiberInput) {
    loop {
        let batch = match input {
            FiberInput::Run(activation) => {
                let runtime = Arc::clone(&activation.runtime);
                runtime.execute(activation)
            }
            FiberInput::Retire => return,
        };
        input = yielder.suspend(batch);
    }
}
