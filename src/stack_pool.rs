//! Preallocated native stacks of one size class.

use corosensei::stack::DefaultStack;
use std::io;

/// A set of native stacks that all share one size.
///
/// Stacks are created either all at once ([`FixedStackPool::allocate`]) or
/// on demand up to a fixed bound ([`FixedStackPool::bounded`]). The pool never
/// holds more than its capacity and never frees a stack while it is lent out;
/// borrowed stacks come back through [`FixedStackPool::give`].
pub struct FixedStackPool {
    stacks: Vec<DefaultStack>,
    stack_size: usize,
    capacity: usize,
    created: usize,
}

// Stacks are plain mappings; nothing in them is tied to the creating thread.
unsafe impl Send for FixedStackPool {}

impl FixedStackPool {
    /// Allocates `count` stacks up front, failing on the first error.
    pub fn allocate(count: usize, stack_size: usize) -> io::Result<Self> {
        let mut pool = Self::bounded(count, stack_size);
        pool.stacks.reserve_exact(count);
        for _ in 0..count {
            let stack = DefaultStack::new(stack_size)?;
            pool.stacks.push(stack);
            pool.created += 1;
        }
        Ok(pool)
    }

    /// Creates an empty pool that allocates lazily, never more than `capacity`.
    pub fn bounded(capacity: usize, stack_size: usize) -> Self {
        FixedStackPool {
            stacks: Vec::new(),
            stack_size,
            capacity,
            created: 0,
        }
    }

    /// Lends out a stack.
    ///
    /// Returns `Ok(None)` when every stack the pool may own is already lent
    /// out, and an error if a lazily created stack could not be mapped.
    pub fn take(&mut self) -> io::Result<Option<DefaultStack>> {
        if let Some(stack) = self.stacks.pop() {
            return Ok(Some(stack));
        }
        if self.created == self.capacity {
            return Ok(None);
        }
        let stack = DefaultStack::new(self.stack_size)?;
        self.created += 1;
        Ok(Some(stack))
    }

    /// Returns a stack obtained from [`FixedStackPool::take`].
    pub fn give(&mut self, stack: DefaultStack) {
        debug_assert!(self.stacks.len() < self.created, "stack returned twice");
        self.stacks.push(stack);
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stacks currently lent out.
    pub fn in_use(&self) -> usize {
        self.created - self.stacks.len()
    }
}
