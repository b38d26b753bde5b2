//! Pooled job counters.
//!
//! Every dispatched batch gets one counter holding the number of jobs that
//! have not finished yet. Counters live in a fixed pool and are addressed by a
//! [`JobHandle`] carrying the owning dispatcher's id and the slot generation,
//! so a handle that outlives its batch, or comes from another dispatcher, can
//! never touch a batch it did not create.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle to a dispatched batch.
///
/// Returned by dispatch and consumed by exactly one `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    runtime: u32,
    index: u32,
    generation: u32,
}

impl JobHandle {
    /// Counter slot this handle refers to.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Id of the dispatcher runtime that issued this handle.
    pub(crate) fn runtime(self) -> u32 {
        self.runtime
    }

    /// Slot part of the handle; the runtime id is kept separately.
    pub(crate) fn to_bits(self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }

    /// Inverse of [`JobHandle::to_bits`]. `u64::MAX` encodes "no handle";
    /// no pool ever has `u32::MAX` slots.
    pub(crate) fn from_bits(runtime: u32, bits: u64) -> Option<Self> {
        (bits != u64::MAX).then(|| JobHandle {
            runtime,
            index: (bits >> 32) as u32,
            generation: bits as u32,
        })
    }
}

// Slot layout: generation in the high 32 bits, remaining jobs in the low 32.
const fn pack(generation: u32, remaining: u32) -> u64 {
    ((generation as u64) << 32) | remaining as u64
}

const fn generation_of(slot: u64) -> u32 {
    (slot >> 32) as u32
}

const fn remaining_of(slot: u64) -> u32 {
    slot as u32
}

/// Fixed-capacity pool of job counters.
pub(crate) struct CounterPool {
    slots: Box<[AtomicU64]>,
    free: ArrayQueue<u32>,
    runtime: u32,
}

impl CounterPool {
    /// Pool of `capacity` counters whose handles are stamped with `runtime`.
    pub fn new(runtime: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for index in 0..capacity as u32 {
            // Cannot fail: the queue was sized for exactly this many slots.
            let _ = free.push(index);
        }
        CounterPool {
            slots: (0..capacity).map(|_| AtomicU64::new(pack(0, 0))).collect(),
            free,
            runtime,
        }
    }

    fn slot(&self, handle: JobHandle) -> Option<&AtomicU64> {
        if handle.runtime != self.runtime {
            return None;
        }
        self.slots.get(handle.index as usize)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Takes a free counter and presets it to `value`.
    pub fn allocate(&self, value: u32) -> Option<JobHandle> {
        let index = self.free.pop()?;
        let slot = &self.slots[index as usize];
        let generation = generation_of(slot.load(Ordering::Acquire));
        slot.store(pack(generation, value), Ordering::Release);
        Some(JobHandle {
            runtime: self.runtime,
            index,
            generation,
        })
    }

    /// Jobs still outstanding, or `None` if the handle is stale or foreign.
    pub fn remaining(&self, handle: JobHandle) -> Option<u32> {
        let slot = self.slot(handle)?.load(Ordering::Acquire);
        (generation_of(slot) == handle.generation).then(|| remaining_of(slot))
    }

    /// Returns true once the batch is finished.
    ///
    /// A stale handle reads as finished: its slot was reclaimed by `wait`,
    /// which only happens after the batch drained.
    pub fn is_done(&self, handle: JobHandle) -> bool {
        self.remaining(handle).is_none_or(|remaining| remaining == 0)
    }

    /// Removes `amount` finished jobs from the batch.
    ///
    /// Returns the new remaining count, or `None` if the handle is stale or
    /// foreign.
    pub fn decrement(&self, handle: JobHandle, amount: u32) -> Option<u32> {
        let slot = self.slot(handle)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if generation_of(current) != handle.generation {
                return None;
            }
            let remaining = remaining_of(current);
            debug_assert!(remaining >= amount, "job counter underflow");
            let next = remaining.saturating_sub(amount);
            match slot.compare_exchange_weak(
                current,
                pack(handle.generation, next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the counter to the pool and invalidates every copy of `handle`.
    ///
    /// Returns false if the handle was already freed.
    pub fn free(&self, handle: JobHandle) -> bool {
        let Some(slot) = self.slot(handle) else {
            return false;
        };
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if generation_of(current) != handle.generation {
                return false;
            }
            let retired = pack(handle.generation.wrapping_add(1), 0);
            match slot.compare_exchange_weak(current, retired, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        // Cannot overflow: each index is pushed back at most once per allocation.
        let _ = self.free.push(handle.index);
        true
    }

    pub fn in_use(&self) -> usize {
        self.capacity() - self.free.len()
    }
}
