//! Allocator capability injected into a storage context.
//!
//! The engine never counts memory through process-wide state. Every request
//! record and every read, write or stat buffer is backed by a [`Lease`] taken
//! from the storage's allocator; dropping the lease hands the bytes back. A
//! lease can only be released once, so `alloc_count == free_count` whenever
//! nothing is in flight.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub alloc_count: usize,
    pub free_count: usize,
    pub bytes_in_use: usize,
}

impl AllocatorStats {
    /// True when every allocation has been paired with a deallocation.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.alloc_count == self.free_count && self.bytes_in_use == 0
    }
}

pub trait Allocator {
    /// Accounts for a new block of `size` bytes. Returning `false` refuses it.
    fn allocate(&self, size: usize) -> bool;

    /// Accounts for the release of a block previously accepted by `allocate`.
    fn deallocate(&self, size: usize);

    fn stats(&self) -> AllocatorStats;
}

/// Counts allocations, optionally refusing anything over a byte budget.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    alloc_count: Cell<usize>,
    free_count: Cell<usize>,
    bytes_in_use: Cell<usize>,
    limit: Option<usize>,
}

impl CountingAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations that would bring the bytes in use above `limit`.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> bool {
        let in_use = self.bytes_in_use.get();
        if let Some(limit) = self.limit {
            if in_use.saturating_add(size) > limit {
                log::warn!("allocator: refusing {size} bytes ({in_use} of {limit} in use)");
                return false;
            }
        }
        self.alloc_count.set(self.alloc_count.get() + 1);
        self.bytes_in_use.set(in_use + size);
        true
    }

    fn deallocate(&self, size: usize) {
        self.free_count.set(self.free_count.get() + 1);
        self.bytes_in_use
            .set(self.bytes_in_use.get().saturating_sub(size));
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            alloc_count: self.alloc_count.get(),
            free_count: self.free_count.get(),
            bytes_in_use: self.bytes_in_use.get(),
        }
    }
}

/// One accepted allocation. Released exactly once, on drop.
pub(crate) struct Lease {
    allocator: Rc<dyn Allocator>,
    size: usize,
}

impl Lease {
    pub(crate) fn acquire(allocator: &Rc<dyn Allocator>, size: usize) -> Result<Self> {
        if !allocator.allocate(size) {
            return Err(Error::Fault);
        }
        Ok(Self {
            allocator: Rc::clone(allocator),
            size,
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.allocator.deallocate(self.size);
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("size", &self.size).finish()
    }
}
