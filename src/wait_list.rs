//! Per-priority lists of fibers waiting to be picked up by a pump loop.

use crate::fiber::FiberId;
use crate::job::JobPriority;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, TryLockError};

/// Why a fiber is in the wait list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Dispatched and not started; any pump loop may run it.
    Fresh,
    /// Suspended in a nested wait; only the pump loop serving that wait may
    /// take it, and only once the awaited counter drained.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitEntry {
    pub fiber: FiberId,
    pub kind: EntryKind,
}

impl WaitEntry {
    pub fn fresh(fiber: FiberId) -> Self {
        WaitEntry {
            fiber,
            kind: EntryKind::Fresh,
        }
    }

    pub fn resume(fiber: FiberId) -> Self {
        WaitEntry {
            fiber,
            kind: EntryKind::Resume,
        }
    }
}

/// Result of a non-blocking scan.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TryClaim {
    /// Another thread holds the lock.
    Contended,
    /// Nothing eligible right now.
    Empty,
    Claimed(WaitEntry),
}

type Lists = [VecDeque<WaitEntry>; JobPriority::COUNT];

/// FIFO lists, one per priority class, behind a single lock.
///
/// The lock only covers list splicing; fibers never run while it is held.
pub(crate) struct PriorityWaitLists {
    lists: Mutex<Lists>,
}

impl PriorityWaitLists {
    pub fn new() -> Self {
        PriorityWaitLists {
            lists: Mutex::new(Default::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, priority: JobPriority, entry: WaitEntry) {
        self.lock()[priority.index()].push_back(entry);
    }

    /// Appends a whole batch under one lock acquisition, keeping its order.
    pub fn push_batch<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (JobPriority, WaitEntry)>,
    {
        let mut lists = self.lock();
        for (priority, entry) in entries {
            lists[priority.index()].push_back(entry);
        }
    }

    /// Removes and returns the first eligible entry, scanning classes from
    /// high to low and each class front to back.
    ///
    /// Never blocks on the lock.
    pub fn try_claim<F>(&self, mut eligible: F) -> TryClaim
    where
        F: FnMut(&WaitEntry) -> bool,
    {
        let mut lists = match self.lists.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return TryClaim::Contended,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        for list in lists.iter_mut() {
            if let Some(position) = list.iter().position(&mut eligible) {
                if let Some(entry) = list.remove(position) {
                    return TryClaim::Claimed(entry);
                }
            }
        }
        TryClaim::Empty
    }

    /// Removes one matching entry wherever it is listed.
    pub fn remove(&self, entry: WaitEntry) -> bool {
        let mut lists = self.lock();
        for list in lists.iter_mut() {
            if let Some(position) = list.iter().position(|listed| *listed == entry) {
                list.remove(position);
                return true;
            }
        }
        false
    }

    /// Total number of listed entries.
    pub fn len(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }
}
