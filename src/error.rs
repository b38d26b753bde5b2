//! Error type shared by every dispatcher entry point.

use crate::fiber_pool::StackClass;
use std::io;

/// Errors reported by the dispatcher.
///
/// Non-fatal conditions ([`DispatchError::WaitStackExhausted`], and
/// [`DispatchError::PoolExhausted`] under the reject policy) are also logged
/// at the point where they happen.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// `init` was called on a dispatcher that is already running.
    #[error("dispatcher already initialized")]
    AlreadyInitialized,

    /// The dispatcher has not been initialized, or was shut down.
    #[error("dispatcher is not initialized")]
    NotInitialized,

    /// A native stack could not be allocated.
    #[error("failed to allocate {stack_size} byte stack for the {class} pool")]
    OutOfMemory {
        class: StackClass,
        stack_size: usize,
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    ThreadSpawn(#[source] io::Error),

    /// The fiber pool could not admit the whole batch.
    #[error("fiber pool exhausted: {admitted} of {requested} jobs admitted")]
    PoolExhausted { requested: usize, admitted: usize },

    /// Every job counter is in use.
    #[error("job counter pool exhausted")]
    CounterPoolExhausted,

    /// The calling thread has no pump stack left for another nested wait.
    #[error("nested wait depth {depth} exceeded, wait skipped")]
    WaitStackExhausted { depth: usize },

    /// The handle was already waited on, or belongs to another dispatcher.
    #[error("invalid or stale job handle")]
    InvalidHandle,

    /// The dispatcher stopped while a wait was still pending.
    #[error("dispatcher shut down during wait")]
    ShutDown,

    /// One or more worker threads panicked.
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}
