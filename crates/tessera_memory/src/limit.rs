//! Limit allocator - shared allocation budget around another allocator
//!
//! Every clone of a `Limit` draws from the same budget, so a container and
//! the test driving it can both observe and steer allocation failures.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{Allocator, Heap};

const UNLIMITED: usize = usize::MAX;

#[derive(Debug)]
struct Budget {
    /// Allocations still permitted (`UNLIMITED` disables the budget)
    remaining: AtomicUsize,
    /// Blocks currently held
    live_blocks: AtomicUsize,
    /// Bytes currently held
    live_bytes: AtomicUsize,
    /// Requests refused because of the budget
    failures: AtomicUsize,
}

/// Allocator wrapper that fails once its allocation budget is spent
#[derive(Debug, Clone)]
pub struct Limit<A = Heap> {
    inner: A,
    budget: Arc<Budget>,
}

impl<A: Allocator> Limit<A> {
    /// Wrap an allocator without any budget
    pub fn new(inner: A) -> Self {
        Self::with_budget(inner, UNLIMITED)
    }

    /// Wrap an allocator that permits `allocations` more successful allocations
    pub fn with_budget(inner: A, allocations: usize) -> Self {
        Self {
            inner,
            budget: Arc::new(Budget {
                remaining: AtomicUsize::new(allocations),
                live_blocks: AtomicUsize::new(0),
                live_bytes: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Permit exactly `allocations` more allocations
    pub fn set_remaining(&self, allocations: usize) {
        self.budget.remaining.store(allocations, Ordering::Release);
    }

    /// Remove the budget
    pub fn unlimit(&self) {
        self.set_remaining(UNLIMITED);
    }

    /// Allocations still permitted, `None` when unlimited
    pub fn remaining(&self) -> Option<usize> {
        match self.budget.remaining.load(Ordering::Acquire) {
            UNLIMITED => None,
            n => Some(n),
        }
    }

    /// Blocks currently allocated through this budget
    pub fn live_blocks(&self) -> usize {
        self.budget.live_blocks.load(Ordering::Relaxed)
    }

    /// Bytes currently allocated through this budget
    pub fn live_bytes(&self) -> usize {
        self.budget.live_bytes.load(Ordering::Relaxed)
    }

    /// Requests refused so far
    pub fn failures(&self) -> usize {
        self.budget.failures.load(Ordering::Relaxed)
    }

    /// Get the wrapped allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn take_permit(&self) -> bool {
        self.budget
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                UNLIMITED => Some(UNLIMITED),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl<A: Allocator + Default> Default for Limit<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: Allocator> Allocator for Limit<A> {
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !self.take_permit() {
            self.budget.failures.fetch_add(1, Ordering::Relaxed);
            log::trace!("Limit refused {} byte allocation: budget spent", size);
            return None;
        }

        let ptr = self.inner.allocate(size, align)?;
        self.budget.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.budget.live_bytes.fetch_add(size, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.budget.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.budget.live_bytes.fetch_sub(size, Ordering::Relaxed);
        self.inner.deallocate(ptr, size, align);
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn used(&self) -> usize {
        self.live_bytes()
    }
}
