//! Worker threads.
//!
//! Each worker attaches a thread context to the runtime and pumps the shared
//! wait lists until shutdown. Workers own no queue of their own; fibers are
//! picked from the priority wait lists by whichever thread gets there first.

use crate::dispatcher::Runtime;
use core_affinity::CoreId;
use log::warn;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Name prefix of dispatcher-owned threads.
pub const WORKER_THREAD_PREFIX: &str = "fiberdispatch-worker";

/// A dispatcher-owned OS thread.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts worker `id`, optionally pinned to `core`.
    pub fn spawn(id: usize, runtime: Arc<Runtime>, core: Option<CoreId>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("{WORKER_THREAD_PREFIX}-{}", id + 1))
            .spawn(move || {
                if let Some(core) = core {
                    if !core_affinity::set_for_current(core) {
                        warn!("Could not pin worker {id} to core {}", core.id);
                    }
                }
                runtime.run_worker();
            })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}
