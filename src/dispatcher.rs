//! The job dispatcher.
//!
//! [`Dispatcher`] is the owned entry point: `init` builds a [`Runtime`] (fiber
//! pools, counter pool, wait lists, worker threads) and `shutdown` tears it
//! down. Everything that runs jobs goes through the runtime's pump loop:
//!
//! - worker threads run one pump loop on their own stack until shutdown;
//! - `wait` runs a nested pump loop on a pump stack of the calling thread
//!   until the awaited batch drains, so a waiting fiber keeps its thread busy
//!   with other fibers instead of blocking it.

use crate::config::{AdmissionPolicy, DispatcherConfig};
use crate::context::JobContext;
use crate::counter::{CounterPool, JobHandle};
use crate::error::DispatchError;
use crate::fiber::{Activation, FiberExit, FiberHeader, FiberId, FiberState};
use crate::fiber_pool::{FiberClaim, FiberPool, StackClass};
use crate::job::{JobDesc, JobPriority};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::signal::WorkSignal;
use crate::thread_context::{self, ThreadContext, ThreadRole, ThreadTag};
use crate::wait_list::{EntryKind, PriorityWaitLists, TryClaim, WaitEntry};
use crate::worker::Worker;
use crossbeam::utils::Backoff;
use log::{debug, error, info, warn};
use std::num::NonZeroU32;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Upper bound on how long an idle pump loop sleeps without a wake-up.
const PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// Stamped into every handle and thread context, so neither is honoured by
/// another dispatcher or by a later `init` of the same one.
static NEXT_RUNTIME_ID: AtomicU32 = AtomicU32::new(1);

/// When a pump loop hands control back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    /// Worker base loop: only on shutdown.
    Shutdown,
    /// Wait from outside any fiber: once the batch drained.
    Drained(JobHandle),
    /// Wait from inside a fiber: once that fiber's resume entry is claimable.
    Resume(FiberId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpOutcome {
    Stopped,
    Drained,
    Resumed,
}

/// State shared by every thread serving one initialized dispatcher.
pub(crate) struct Runtime {
    id: u32,
    liveness: Arc<()>,
    config: DispatcherConfig,
    pools: [FiberPool; 2],
    wait_lists: PriorityWaitLists,
    counters: CounterPool,
    pub(crate) signal: WorkSignal,
    next_tag: AtomicU32,
    metrics: DispatchMetrics,
}

impl Runtime {
    fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let config = config.resolved();

        info!(
            "Creating {} fibers with {}(kb) stack",
            config.big_pool_size,
            config.big_stack_size / 1024
        );
        let big = FiberPool::create(StackClass::Big, config.big_pool_size, config.big_stack_size)?;

        info!(
            "Creating {} fibers with {}(kb) stack",
            config.small_pool_size,
            config.small_stack_size / 1024
        );
        let small =
            FiberPool::create(StackClass::Small, config.small_pool_size, config.small_stack_size)?;

        for pool in [&small, &big] {
            debug!(
                "{} pool ready: {} fibers, {} byte stacks",
                pool.class(),
                pool.capacity(),
                pool.stack_size()
            );
        }

        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        Ok(Runtime {
            id,
            liveness: Arc::new(()),
            counters: CounterPool::new(id, config.max_counters as usize),
            config,
            pools: [small, big],
            wait_lists: PriorityWaitLists::new(),
            signal: WorkSignal::new(),
            next_tag: AtomicU32::new(1),
            metrics: DispatchMetrics::new(),
        })
    }

    fn pool(&self, class: StackClass) -> &FiberPool {
        &self.pools[class.index()]
    }

    fn header(&self, fiber: FiberId) -> &FiberHeader {
        self.pool(fiber.class).header(fiber)
    }

    pub(crate) fn new_thread_context(&self, role: ThreadRole) -> ThreadContext {
        let raw = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let tag = ThreadTag::from_raw(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN));
        ThreadContext::new(
            self.id,
            &self.liveness,
            tag,
            role,
            self.config.max_wait_depth,
            self.config.pump_stack_size,
        )
    }

    /// This thread's context, attaching one on first use from a thread the
    /// dispatcher did not start.
    fn thread_context(&self) -> Rc<ThreadContext> {
        thread_context::current(self.id).unwrap_or_else(|| {
            let context = Rc::new(self.new_thread_context(ThreadRole::External));
            debug!(
                "Attaching thread {:?} as #{} ({:?})",
                std::thread::current().name(),
                context.tag().get(),
                context.role()
            );
            thread_context::attach(Rc::clone(&context));
            context
        })
    }

    pub(crate) fn dispatch<I>(self: &Arc<Self>, class: StackClass, jobs: I) -> Result<JobHandle, DispatchError>
    where
        I: IntoIterator<Item = JobDesc>,
    {
        let pool = self.pool(class);
        let mut requested = 0;
        let mut admitted: Vec<(FiberClaim<'_>, JobDesc, usize)> = Vec::new();
        for (index, job) in jobs.into_iter().enumerate() {
            requested += 1;
            if let Some(claim) = pool.acquire() {
                admitted.push((claim, job, index));
            }
        }

        let rejected = requested - admitted.len();
        if rejected > 0 {
            warn!(
                "Exceeded maximum jobs ({}) in the {} pool: {} of {} jobs without a fiber",
                pool.capacity(),
                class,
                rejected,
                requested
            );
            if self.config.admission == AdmissionPolicy::RejectBatch {
                let admitted_count = admitted.len();
                release_all(admitted);
                DispatchMetrics::add(&self.metrics.jobs_rejected, requested as u64);
                return Err(DispatchError::PoolExhausted {
                    requested,
                    admitted: admitted_count,
                });
            }
            DispatchMetrics::add(&self.metrics.jobs_rejected, rejected as u64);
        }

        let Some(handle) = self.counters.allocate(admitted.len() as u32) else {
            warn!("Exceeded maximum counters ({})", self.counters.capacity());
            release_all(admitted);
            return Err(DispatchError::CounterPoolExhausted);
        };

        if let Some(running) = thread_context::current(self.id).and_then(|ctx| ctx.running()) {
            self.header(running).set_wait_dependency(Some(handle));
        }

        let count = admitted.len();
        let entries: Vec<(JobPriority, WaitEntry)> = admitted
            .into_iter()
            .map(|(mut claim, job, index)| {
                claim.header().reset(job.priority);
                claim.fiber().prepare(job.work, index, handle);
                (job.priority, WaitEntry::fresh(claim.into_listed()))
            })
            .collect();
        self.wait_lists.push_batch(entries);
        self.signal.add_pending(count);

        DispatchMetrics::add(&self.metrics.batches_dispatched, 1);
        DispatchMetrics::add(&self.metrics.jobs_dispatched, count as u64);
        Ok(handle)
    }

    pub(crate) fn wait(self: &Arc<Self>, handle: JobHandle) -> Result<(), DispatchError> {
        let Some(remaining) = self.counters.remaining(handle) else {
            if handle.runtime() == self.id {
                error!("Wait on released job handle {handle:?}");
            } else {
                error!("Wait on job handle {handle:?} issued by another dispatcher");
            }
            return Err(DispatchError::InvalidHandle);
        };

        let result = if remaining == 0 {
            DispatchMetrics::add(&self.metrics.waits_fast, 1);
            Ok(())
        } else {
            self.wait_suspended(handle)
        };
        self.counters.free(handle);
        result
    }

    fn wait_suspended(self: &Arc<Self>, handle: JobHandle) -> Result<(), DispatchError> {
        let context = self.thread_context();
        let waiter = context.replace_running(None);
        let exit = match waiter {
            Some(fiber) => PumpExit::Resume(fiber),
            None => PumpExit::Drained(handle),
        };

        let runtime = Arc::clone(self);
        let pump_context = Rc::clone(&context);
        let outcome = context.run_on_pump_stack(move || {
            if let Some(fiber) = waiter {
                runtime.park_waiter(fiber, pump_context.tag(), handle);
            }
            let outcome = runtime.pump(&pump_context, exit);
            if let (Some(fiber), PumpOutcome::Stopped) = (waiter, outcome) {
                runtime.unpark_waiter(fiber);
            }
            outcome
        });
        context.replace_running(waiter);

        match outcome {
            Ok(PumpOutcome::Drained | PumpOutcome::Resumed) => {
                DispatchMetrics::add(&self.metrics.waits_suspended, 1);
                Ok(())
            }
            Ok(PumpOutcome::Stopped) => Err(DispatchError::ShutDown),
            Err(err) => {
                warn!(
                    "Maximum wait stacks '{}' exceeded. Cannot wait",
                    self.config.max_wait_depth
                );
                DispatchMetrics::add(&self.metrics.wait_stack_exhausted, 1);
                Err(err)
            }
        }
    }

    /// Re-lists a fiber that is about to wait, pinned to this thread.
    fn park_waiter(&self, fiber: FiberId, thread: ThreadTag, handle: JobHandle) {
        let header = self.header(fiber);
        header.pin(thread, handle);
        let parked = header.transition(FiberState::Running, FiberState::Listed);
        debug_assert!(parked, "waiting fiber was not running");
        self.wait_lists.push(header.priority(), WaitEntry::resume(fiber));
        self.signal.add_pending(1);
    }

    /// Takes a waiter's resume entry back after its pump loop was stopped.
    fn unpark_waiter(&self, fiber: FiberId) {
        if self.wait_lists.remove(WaitEntry::resume(fiber)) {
            self.signal.take_pending();
        }
        let header = self.header(fiber);
        header.unpin();
        let _ = header.transition(FiberState::Listed, FiberState::Running);
    }

    fn is_claimable(&self, entry: &WaitEntry, thread: ThreadTag, exit: PumpExit) -> bool {
        let header = self.header(entry.fiber);
        if !header.owner().admits(thread) {
            return false;
        }
        match entry.kind {
            EntryKind::Fresh => true,
            EntryKind::Resume => {
                exit == PumpExit::Resume(entry.fiber)
                    && header
                        .wait_dependency()
                        .is_none_or(|dependency| self.counters.is_done(dependency))
            }
        }
    }

    fn pump(self: &Arc<Self>, context: &ThreadContext, exit: PumpExit) -> PumpOutcome {
        let backoff = Backoff::new();
        loop {
            if self.signal.is_stopping() {
                return PumpOutcome::Stopped;
            }
            if let PumpExit::Drained(handle) = exit {
                if self.counters.is_done(handle) {
                    return PumpOutcome::Drained;
                }
            }

            let epoch = self.signal.epoch();
            let tag = context.tag();
            match self
                .wait_lists
                .try_claim(|entry| self.is_claimable(entry, tag, exit))
            {
                TryClaim::Claimed(entry) => {
                    self.signal.take_pending();
                    backoff.reset();
                    match entry.kind {
                        EntryKind::Resume => {
                            let header = self.header(entry.fiber);
                            header.unpin();
                            let resumed = header.transition(FiberState::Listed, FiberState::Running);
                            debug_assert!(resumed, "resumed fiber was not listed");
                            return PumpOutcome::Resumed;
                        }
                        EntryKind::Fresh => self.run_fiber(context, entry.fiber),
                    }
                }
                TryClaim::Contended => backoff.snooze(),
                TryClaim::Empty if !backoff.is_completed() => backoff.snooze(),
                TryClaim::Empty => self.signal.park(epoch, PARK_TIMEOUT),
            }
        }
    }

    fn run_fiber(self: &Arc<Self>, context: &ThreadContext, fiber: FiberId) {
        let Some(mut claim) = self.pool(fiber.class).claim(fiber) else {
            error!("Fiber {fiber:?} was listed but could not be claimed");
            return;
        };
        let priority = claim.header().priority();
        let previous = context.replace_running(Some(fiber));
        let exit = claim.fiber().resume(self, fiber, priority);
        context.replace_running(previous);
        // The fiber goes back to its pool before the counter can reach zero,
        // so a drained waiter always sees it free.
        claim.release();
        match exit {
            FiberExit::Completed(batch) => self.finish_job(batch),
            FiberExit::Idle => error!("Fiber {fiber:?} was listed without a staged job"),
        }
    }

    fn finish_job(&self, batch: JobHandle) {
        match self.counters.decrement(batch, 1) {
            Some(0) => self.signal.wake_all(),
            Some(_) => {}
            None => warn!("Job of {batch:?} finished after its batch handle was released"),
        }
    }

    /// Runs one job on the current fiber's stack and returns its batch.
    pub(crate) fn execute(self: &Arc<Self>, activation: Activation) -> JobHandle {
        let Activation {
            runtime: _,
            fiber,
            job,
            index,
            priority,
            batch,
        } = activation;

        let thread = thread_context::current(self.id).map(|context| context.tag());
        let context = JobContext::new(self, fiber, thread, index, priority);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(&context))) {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            error!("Job {index} panicked: {message}");
            DispatchMetrics::add(&self.metrics.job_panics, 1);
        }
        DispatchMetrics::add(&self.metrics.jobs_completed, 1);
        batch
    }

    /// Worker thread body.
    pub(crate) fn run_worker(self: &Arc<Self>) {
        let context = Rc::new(self.new_thread_context(ThreadRole::Worker));
        thread_context::attach(Rc::clone(&context));
        debug!("Worker #{} started", context.tag().get());

        let outcome = self.pump(&context, PumpExit::Shutdown);
        debug_assert_eq!(outcome, PumpOutcome::Stopped);

        thread_context::detach(self.id);
        debug!("Worker #{} stopped", context.tag().get());
    }
}

fn release_all(admitted: Vec<(FiberClaim<'_>, JobDesc, usize)>) {
    for (claim, _, _) in admitted {
        claim.release();
    }
}

struct Running {
    runtime: Arc<Runtime>,
    workers: Vec<Worker>,
}

/// A fiber-based job dispatcher.
///
/// Created uninitialized; [`Dispatcher::init`] allocates the fiber pools and
/// starts the worker threads, [`Dispatcher::shutdown`] stops them. The thread
/// that calls `init` becomes the dispatcher's main thread: it runs jobs only
/// while it waits.
///
/// # Example
///
/// ```no_run
/// use fiberdispatch::{Dispatcher, DispatcherConfig, JobDesc, JobPriority};
///
/// let dispatcher = Dispatcher::new();
/// dispatcher.init(DispatcherConfig::default().worker_threads(2)).unwrap();
///
/// let handle = dispatcher
///     .dispatch_small((0..4).map(|_| {
///         JobDesc::new(JobPriority::Normal, |ctx| println!("job {}", ctx.index()))
///     }))
///     .unwrap();
/// dispatcher.wait(handle).unwrap();
/// dispatcher.shutdown().unwrap();
/// ```
pub struct Dispatcher {
    state: RwLock<Option<Running>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            state: RwLock::new(None),
        }
    }

    /// Allocates fiber pools and starts worker threads.
    ///
    /// On error the dispatcher stays uninitialized and `init` may be retried.
    pub fn init(&self, config: DispatcherConfig) -> Result<(), DispatchError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            return Err(DispatchError::AlreadyInitialized);
        }

        let runtime = Arc::new(Runtime::new(&config)?);
        let main = Rc::new(runtime.new_thread_context(ThreadRole::Main));

        let worker_count = usize::from(runtime.config.worker_threads);
        let cores = if runtime.config.pin_threads_to_cores {
            core_affinity::get_core_ids().filter(|ids| !ids.is_empty())
        } else {
            None
        };

        let mut workers = Vec::with_capacity(worker_count);
        if worker_count > 0 {
            info!("Starting {worker_count} worker threads");
        }
        for id in 0..worker_count {
            let core = cores.as_ref().map(|ids| ids[(id + 1) % ids.len()]);
            match Worker::spawn(id, Arc::clone(&runtime), core) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    runtime.signal.request_stop();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(DispatchError::ThreadSpawn(err));
                }
            }
        }

        thread_context::attach(main);
        *state = Some(Running { runtime, workers });
        Ok(())
    }

    /// Stops and joins the worker threads, then frees every fiber and stack.
    ///
    /// Batches should be waited on first; listed jobs that never started are
    /// dropped.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        let running = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DispatchError::NotInitialized)?;

        info!("Shutting down job dispatcher");
        let Running { runtime, workers } = running;
        runtime.signal.request_stop();

        let mut panicked = 0;
        for worker in workers {
            let id = worker.id();
            if worker.join().is_err() {
                error!("Worker {id} panicked");
                panicked += 1;
            }
        }

        let listed = runtime.wait_lists.len();
        if listed > 0 {
            warn!("Dropping {listed} listed jobs that never ran");
        }
        let open = runtime.counters.in_use();
        if open > 0 {
            debug!("{open} job handles were never waited on");
        }

        if thread_context::detach(runtime.id).is_none() {
            debug!("Shutdown called off the main thread; its context is dropped at thread exit");
        }
        drop(runtime);

        if panicked > 0 {
            Err(DispatchError::WorkerPanicked(panicked))
        } else {
            Ok(())
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, DispatchError> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| Arc::clone(&running.runtime))
            .ok_or(DispatchError::NotInitialized)
    }

    /// Dispatches a batch on small-stack fibers.
    pub fn dispatch_small<I>(&self, jobs: I) -> Result<JobHandle, DispatchError>
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.runtime()?.dispatch(StackClass::Small, jobs)
    }

    /// Dispatches a batch on big-stack fibers.
    pub fn dispatch_big<I>(&self, jobs: I) -> Result<JobHandle, DispatchError>
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.runtime()?.dispatch(StackClass::Big, jobs)
    }

    /// Waits until every job of the batch has finished, running other jobs on
    /// this thread meanwhile. Consumes the handle.
    pub fn wait(&self, handle: JobHandle) -> Result<(), DispatchError> {
        self.runtime()?.wait(handle)
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime().is_ok()
    }

    pub fn num_workers(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |running| running.workers.len())
    }

    /// Fibers of the given class currently free.
    pub fn available_fibers(&self, class: StackClass) -> Option<usize> {
        self.runtime().ok().map(|runtime| runtime.pool(class).available())
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.runtime().ok().map(|runtime| runtime.metrics.snapshot())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(err) = self.shutdown() {
                error!("Shutdown on drop failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(workers: u8) -> DispatcherConfig {
        DispatcherConfig::with_pools(16, 64, 4, 128).worker_threads(workers)
    }

    #[test]
    fn test_dispatcher_creation() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.is_initialized());
        dispatcher.init(config(2)).unwrap();
        assert!(dispatcher.is_initialized());
        assert_eq!(dispatcher.num_workers(), 2);
        assert_eq!(dispatcher.available_fibers(StackClass::Small), Some(16));
        assert_eq!(dispatcher.available_fibers(StackClass::Big), Some(4));
        dispatcher.shutdown().expect("Shutdown failed");
        assert!(!dispatcher.is_initialized());
    }

    #[test]
    fn test_fibers_return_to_pool() {
        let dispatcher = Dispatcher::new();
        dispatcher.init(config(1)).unwrap();

        let executed = Arc::new(AtomicUsize::new(0));
        let jobs = (0..10).map(|_| {
            let executed = executed.clone();
            JobDesc::normal(move |_| {
                executed.fetch_add(1, Ordering::SeqCst);
            })
        });
        let handle = dispatcher.dispatch_small(jobs).unwrap();
        dispatcher.wait(handle).unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 10);
        assert_eq!(dispatcher.available_fibers(StackClass::Small), Some(16));
        let metrics = dispatcher.metrics().unwrap();
        assert_eq!(metrics.jobs_completed, 10);
        assert_eq!(metrics.jobs_in_flight(), 0);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn test_pinned_resume_entry_is_only_claimable_by_its_waiter() {
        let dispatcher = Dispatcher::new();
        dispatcher.init(config(0)).unwrap();
        let runtime = dispatcher.runtime().unwrap();

        let counters_handle = runtime.counters.allocate(0).unwrap();
        let fiber = runtime.pool(StackClass::Small).acquire().unwrap().into_listed();
        let header = runtime.header(fiber);
        assert!(header.transition(FiberState::Listed, FiberState::Running));

        let owner = ThreadTag::from_raw(NonZeroU32::new(9).unwrap());
        let other = ThreadTag::from_raw(NonZeroU32::new(10).unwrap());
        runtime.park_waiter(fiber, owner, counters_handle);
        assert_eq!(header.state(), FiberState::Listed);

        let entry = WaitEntry::resume(fiber);
        assert!(runtime.is_claimable(&entry, owner, PumpExit::Resume(fiber)));
        assert!(!runtime.is_claimable(&entry, other, PumpExit::Resume(fiber)));
        assert!(!runtime.is_claimable(&entry, owner, PumpExit::Shutdown));

        runtime.unpark_waiter(fiber);
        assert_eq!(header.state(), FiberState::Running);
        assert_eq!(runtime.wait_lists.len(), 0);
        assert_eq!(runtime.signal.pending(), 0);

        drop(runtime);
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn test_fiber_is_free_once_wait_returns() {
        let dispatcher = Dispatcher::new();
        dispatcher.init(config(2)).unwrap();

        for round in 0..200 {
            let handle = dispatcher
                .dispatch_small([JobDesc::normal(|_| std::hint::spin_loop())])
                .unwrap();
            dispatcher.wait(handle).unwrap();
            assert_eq!(
                dispatcher.available_fibers(StackClass::Small),
                Some(16),
                "fiber still held after wait in round {round}"
            );
        }
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn test_handles_are_bound_to_their_runtime() {
        let a = Dispatcher::new();
        let b = Dispatcher::new();
        a.init(config(0)).unwrap();
        b.init(config(0)).unwrap();

        let a_handle = a.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
        let b_handle = b.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
        assert_eq!(a_handle.index(), b_handle.index());

        assert!(matches!(b.wait(a_handle), Err(DispatchError::InvalidHandle)));
        let b_runtime = b.runtime().unwrap();
        assert_eq!(b_runtime.counters.decrement(a_handle, 1), None);
        assert_eq!(b_runtime.counters.remaining(b_handle), Some(1));
        drop(b_runtime);

        b.wait(b_handle).unwrap();
        a.wait(a_handle).unwrap();
        a.shutdown().unwrap();
        b.shutdown().unwrap();
    }

    #[test]
    fn test_external_context_is_pruned_after_reinit() {
        let dispatcher = Dispatcher::new();
        let round = |dispatcher: &Dispatcher| {
            std::thread::scope(|scope| {
                scope.spawn(|| dispatcher.init(config(0)).unwrap());
            });
            // No workers, so this thread pumps the job as an external thread
            let handle = dispatcher.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
            dispatcher.wait(handle).unwrap();
            assert_eq!(thread_context::attached(), 1);
            std::thread::scope(|scope| {
                scope.spawn(|| dispatcher.shutdown().unwrap());
            });
        };

        round(&dispatcher);
        round(&dispatcher);
        round(&dispatcher);
        assert_eq!(thread_context::attached(), 1);
    }
}
