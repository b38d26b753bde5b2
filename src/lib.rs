//! # fiberdispatch - Fiber-Based Job Dispatcher
//!
//! A job dispatcher that runs batches of short jobs on pooled fibers spread
//! across a set of worker threads. A job may dispatch further batches and wait
//! on them; waiting suspends the job's fiber, not its thread, and the thread
//! keeps running other fibers until the awaited batch drains.
//!
//! ## Architecture
//!
//! - **Fiber pools**: two fixed arenas of fibers, one with small stacks and
//!   one with big stacks. Pools never grow.
//! - **Wait lists**: FIFO lists of runnable fibers, one per priority class,
//!   scanned from high to low priority.
//! - **Job counters**: a fixed pool of generation-checked counters; a
//!   [`JobHandle`] names one of them until it is waited on.
//! - **Worker threads**: OS threads that pump the wait lists. The thread that
//!   calls [`Dispatcher::init`] is the main thread and pumps only while it
//!   waits.
//! - **Nested waits**: a waiting fiber is pinned to its thread and resumed by
//!   a pump loop running on one of that thread's bounded pump stacks.
//!
//! ## Example
//!
//! ```no_run
//! use fiberdispatch::{Dispatcher, DispatcherConfig, JobDesc, JobPriority};
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher.init(DispatcherConfig::default()).unwrap();
//!
//! let handle = dispatcher
//!     .dispatch_small([JobDesc::new(JobPriority::High, |ctx| {
//!         let inner = ctx
//!             .dispatch_small((0..4).map(|_| JobDesc::normal(|_| {})))
//!             .unwrap();
//!         ctx.wait(inner).unwrap();
//!     })])
//!     .unwrap();
//! dispatcher.wait(handle).unwrap();
//! dispatcher.shutdown().unwrap();
//! ```

pub mod config;
pub mod context;
pub mod counter;
pub mod dispatcher;
pub mod error;
pub mod fiber;
pub mod fiber_pool;
pub mod job;
pub mod metrics;
mod signal;
pub mod stack_pool;
pub mod thread_context;
mod wait_list;
mod worker;

pub use config::{AdmissionPolicy, DispatcherConfig, WORKER_THREADS_AUTO};
pub use context::JobContext;
pub use counter::JobHandle;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use fiber::{FiberId, FiberOwner, FiberState};
pub use fiber_pool::StackClass;
pub use job::{JobDesc, JobPriority};
pub use metrics::MetricsSnapshot;
pub use thread_context::{ThreadRole, ThreadTag};
pub use worker::WORKER_THREAD_PREFIX;
