//! Per-OS-thread dispatcher state.
//!
//! Each thread that pumps fibers for a dispatcher has one [`ThreadContext`]
//! for it: the fiber it is currently running, its thread tag, and a bounded
//! ring of pump stacks used by nested waits. Contexts are registered in a
//! thread-local list keyed by dispatcher, so one thread can serve several
//! dispatchers. Contexts whose dispatcher has shut down are pruned the next
//! time the thread attaches.

use crate::error::DispatchError;
use crate::fiber::FiberId;
use crate::stack_pool::FixedStackPool;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, RefCell};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::{Arc, Weak};

/// Identity of a thread within one dispatcher. Never zero, so "unowned" can
/// be encoded as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadTag(NonZeroU32);

impl ThreadTag {
    pub(crate) fn from_raw(raw: NonZeroU32) -> Self {
        ThreadTag(raw)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// How a thread came to pump fibers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// The thread that called `init`.
    Main,
    /// A thread spawned by the dispatcher.
    Worker,
    /// Any other thread that dispatched or waited.
    External,
}

pub(crate) struct ThreadContext {
    runtime_id: u32,
    liveness: Weak<()>,
    tag: ThreadTag,
    role: ThreadRole,
    running: Cell<Option<FiberId>>,
    pump_stacks: RefCell<FixedStackPool>,
}

impl ThreadContext {
    pub fn new(
        runtime_id: u32,
        liveness: &Arc<()>,
        tag: ThreadTag,
        role: ThreadRole,
        max_wait_depth: usize,
        pump_stack_size: usize,
    ) -> Self {
        ThreadContext {
            runtime_id,
            liveness: Arc::downgrade(liveness),
            tag,
            role,
            running: Cell::new(None),
            pump_stacks: RefCell::new(FixedStackPool::bounded(max_wait_depth, pump_stack_size)),
        }
    }

    pub fn tag(&self) -> ThreadTag {
        self.tag
    }

    pub fn role(&self) -> ThreadRole {
        self.role
    }

    /// False once the dispatcher runtime this context serves is gone.
    pub fn is_live(&self) -> bool {
        self.liveness.strong_count() > 0
    }

    /// The fiber this thread is executing, if any.
    pub fn running(&self) -> Option<FiberId> {
        self.running.get()
    }

    /// Swaps the running fiber, returning the previous one.
    pub fn replace_running(&self, fiber: Option<FiberId>) -> Option<FiberId> {
        self.running.replace(fiber)
    }

    /// Number of nested waits currently suspended on this thread.
    #[cfg(test)]
    pub fn wait_depth(&self) -> usize {
        self.pump_stacks.borrow().in_use()
    }

    /// Runs `body` to completion on one of this thread's pump stacks.
    ///
    /// Fails with [`DispatchError::WaitStackExhausted`] when every pump stack
    /// is already in use by an outer wait.
    pub fn run_on_pump_stack<R, F>(&self, body: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + 'static,
        R: 'static,
    {
        let taken = self.pump_stacks.borrow_mut().take();
        let depth = self.pump_stacks.borrow().capacity();
        let stack = match taken {
            Ok(Some(stack)) => stack,
            Ok(None) => return Err(DispatchError::WaitStackExhausted { depth }),
            Err(err) => {
                log::error!("failed to map pump stack: {err}");
                return Err(DispatchError::WaitStackExhausted { depth });
            }
        };

        let mut pump = Coroutine::with_stack(stack, move |_: &Yielder<(), ()>, ()| body());
        let result = match pump.resume(()) {
            CoroutineResult::Return(result) => result,
            CoroutineResult::Yield(()) => unreachable!("pump loops never yield"),
        };
        self.pump_stacks.borrow_mut().give(pump.into_stack());
        Ok(result)
    }
}

thread_local! {
    static CONTEXTS: RefCell<Vec<Rc<ThreadContext>>> = const { RefCell::new(Vec::new()) };
}

/// This thread's context for the given dispatcher runtime.
pub(crate) fn current(runtime_id: u32) -> Option<Rc<ThreadContext>> {
    CONTEXTS.with(|contexts| {
        contexts
            .borrow()
            .iter()
            .find(|context| context.runtime_id == runtime_id)
            .cloned()
    })
}

pub(crate) fn attach(context: Rc<ThreadContext>) {
    CONTEXTS.with(|contexts| {
        let mut contexts = contexts.borrow_mut();
        contexts.retain(|c| c.is_live());
        debug_assert!(
            contexts.iter().all(|c| c.runtime_id != context.runtime_id),
            "thread attached twice"
        );
        contexts.push(context);
    });
}

/// Contexts registered on this thread, live or not.
#[cfg(test)]
pub(crate) fn attached() -> usize {
    CONTEXTS.with(|contexts| contexts.borrow().len())
}

pub(crate) fn detach(runtime_id: u32) -> Option<Rc<ThreadContext>> {
    CONTEXTS.with(|contexts| {
        let mut contexts = contexts.borrow_mut();
        let position = contexts.iter().position(|c| c.runtime_id == runtime_id)?;
        Some(contexts.swap_remove(position))
    })
}
