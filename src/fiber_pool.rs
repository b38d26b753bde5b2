use crate::error::DispatchError;
use crate::fiber::{Fiber, FiberHeader, FiberId, FiberState};
use crate::stack_pool::FixedStackPool;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::fmt;

/// Stack size class of a fiber pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackClass {
    Small,
    Big,
}

impl StackClass {
    pub(crate) fn index(self) -> usize {
        match self {
            StackClass::Small => 0,
            StackClass::Big => 1,
        }
    }
}

impl fmt::Display for StackClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackClass::Small => f.write_str("small"),
            StackClass::Big => f.write_str("big"),
        }
    }
}

struct FiberSlot {
    header: FiberHeader,
    fiber: UnsafeCell<Fiber>,
}

/// A fixed arena of fibers sharing one stack size.
///
/// The pool never grows: when every fiber is out, [`FiberPool::acquire`]
/// returns `None` and the caller decides what to do with the job.
pub(crate) struct FiberPool {
    class: StackClass,
    slots: Box<[FiberSlot]>,
    free: ArrayQueue<u16>,
    stacks: FixedStackPool,
}

// Fiber bodies are only reached through a `FiberClaim`, and at most one claim
// exists per fiber: claims are minted by popping the free-list or by the
// Listed -> Running transition, both of which are exclusive.
unsafe impl Sync for FiberPool {}

impl FiberPool {
    /// Preallocates `max_fibers` fibers with `stack_size` byte stacks.
    pub fn create(class: StackClass, max_fibers: u16, stack_size: usize) -> Result<Self, DispatchError> {
        let count = usize::from(max_fibers).max(1);
        let mut stacks = FixedStackPool::allocate(count, stack_size).map_err(|source| {
            DispatchError::OutOfMemory {
                class,
                stack_size,
                source,
            }
        })?;

        let mut slots = Vec::with_capacity(count);
        while let Ok(Some(stack)) = stacks.take() {
            slots.push(FiberSlot {
                header: FiberHeader::new(),
                fiber: UnsafeCell::new(Fiber::new(stack)),
            });
        }

        let free = ArrayQueue::new(count);
        for index in 0..count {
            // Cannot fail: the queue holds exactly `count` entries.
            let _ = free.push(index as u16);
        }

        Ok(FiberPool {
            class,
            slots: slots.into_boxed_slice(),
            free,
            stacks,
        })
    }

    pub fn class(&self) -> StackClass {
        self.class
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fibers currently in the free-list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn stack_size(&self) -> usize {
        self.stacks.stack_size()
    }

    /// Takes a fiber out of the free-list, reserving it for the wait list.
    pub(crate) fn acquire(&self) -> Option<FiberClaim<'_>> {
        let index = self.free.pop()?;
        let header = &self.slots[usize::from(index)].header;
        let reserved = header.transition(FiberState::Free, FiberState::Listed);
        debug_assert!(reserved, "fiber in free-list was not free");
        Some(FiberClaim { pool: self, index })
    }

    /// Claims a listed fiber for execution.
    ///
    /// Only fresh wait-list entries may be claimed this way; a fiber parked by
    /// a nested wait is still borrowed by the pump loop below it.
    pub(crate) fn claim(&self, id: FiberId) -> Option<FiberClaim<'_>> {
        debug_assert_eq!(id.class, self.class);
        let header = &self.slots.get(usize::from(id.index))?.header;
        header
            .transition(FiberState::Listed, FiberState::Running)
            .then_some(FiberClaim {
                pool: self,
                index: id.index,
            })
    }

    pub(crate) fn header(&self, id: FiberId) -> &FiberHeader {
        &self.slots[usize::from(id.index)].header
    }

    fn release_index(&self, index: u16) {
        let header = &self.slots[usize::from(index)].header;
        let previous = header.state();
        debug_assert_ne!(previous, FiberState::Free, "fiber released twice");
        let _ = header.transition(previous, FiberState::Free);
        // Cannot overflow: a fiber is pushed back at most once per acquire.
        let _ = self.free.push(index);
    }
}

impl Drop for FiberPool {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        for slot in slots.into_vec() {
            let stack = slot.fiber.into_inner().retire();
            self.stacks.give(stack);
        }
        debug_assert_eq!(self.stacks.in_use(), 0);
    }
}

/// Exclusive access to one fiber's body.
#[must_use = "a claimed fiber must be released or listed"]
pub(crate) struct FiberClaim<'a> {
    pool: &'a FiberPool,
    index: u16,
}

impl<'a> FiberClaim<'a> {
    pub fn id(&self) -> FiberId {
        FiberId {
            class: self.pool.class,
            index: self.index,
        }
    }

    pub fn header(&self) -> &'a FiberHeader {
        &self.pool.slots[usize::from(self.index)].header
    }

    pub fn fiber(&mut self) -> &mut Fiber {
        let slot = &self.pool.slots[usize::from(self.index)];
        // SAFETY: this claim is the only one for the slot (see `FiberPool`),
        // and `&mut self` keeps it from handing out a second reference.
        unsafe { &mut *slot.fiber.get() }
    }

    /// Hands the fiber to the wait list, giving up exclusive access.
    pub fn into_listed(self) -> FiberId {
        self.id()
    }

    /// Returns the fiber to the free-list.
    pub fn release(self) {
        self.pool.release_index(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = FiberPool::create(StackClass::Small, 4, 64 * 1024).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.class(), StackClass::Small);
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = FiberPool::create(StackClass::Big, 2, 64 * 1024).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none(), "pool must not grow");
        assert_eq!(pool.available(), 0);

        assert_eq!(a.header().state(), FiberState::Listed);
        a.release();
        assert_eq!(pool.available(), 1);
        b.release();
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let pool = FiberPool::create(StackClass::Small, 1, 64 * 1024).unwrap();
        let id = pool.acquire().unwrap().into_listed();

        let claim = pool.claim(id).expect("listed fiber must be claimable");
        assert_eq!(claim.header().state(), FiberState::Running);
        assert!(pool.claim(id).is_none(), "fiber claimed twice");

        claim.release();
        assert_eq!(pool.header(id).state(), FiberState::Free);
        assert!(pool.claim(id).is_none(), "free fiber claimed");
    }

    #[test]
    fn test_drop_never_used_pool() {
        let pool = FiberPool::create(StackClass::Small, 8, 64 * 1024).unwrap();
        assert_eq!(pool.available(), 8);
        drop(pool);

        let pool = FiberPool::create(StackClass::Big, 2, 64 * 1024).unwrap();
        let claim = pool.acquire().unwrap();
        claim.release();
        drop(pool);
    }
}
