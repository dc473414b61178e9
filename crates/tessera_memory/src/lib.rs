//! # tessera_memory - Allocator Capability
//!
//! Allocators the paged containers draw their storage from:
//! - Heap: the global allocator, the default for every container
//! - Pool: fixed-size block allocation, sized for index pages
//! - Limit: wrapper with a shared allocation budget for failure injection
//!
//! Containers are generic over [`Allocator`] and only ever talk to it through
//! the typed helpers of [`TypedAllocator`], which "rebind" one allocator
//! instance to every element type the container needs.

use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::Arc;

use tessera_core::{Error, Result};

pub mod heap;
pub mod limit;
pub mod pool;

pub use heap::Heap;
pub use limit::Limit;
pub use pool::{Pool, PoolStats};

/// Common trait for all allocators
pub trait Allocator: Send + Sync {
    /// Allocate memory with the given layout, `None` when exhausted
    ///
    /// Callers never request zero-sized blocks.
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Deallocate memory
    /// # Safety
    /// The pointer must have been allocated by this allocator (or a clone of
    /// it) with the same size and alignment
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);

    /// Get the total capacity, `usize::MAX` if unbounded
    fn capacity(&self) -> usize;

    /// Get the currently used memory
    fn used(&self) -> usize;

    /// Get the available memory
    fn available(&self) -> usize {
        self.capacity().saturating_sub(self.used())
    }
}

/// Typed allocation on top of any [`Allocator`]
pub trait TypedAllocator: Allocator {
    /// Allocate an uninitialized array of `count` values
    ///
    /// Zero-sized requests return a dangling pointer without touching the
    /// allocator.
    fn allocate_array<T>(&self, count: usize) -> Result<NonNull<T>> {
        let layout = Layout::array::<T>(count)?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }

        self.allocate(layout.size(), layout.align())
            .map(NonNull::cast)
            .ok_or_else(|| Error::allocation(layout))
    }

    /// Release an array obtained from [`TypedAllocator::allocate_array`]
    ///
    /// # Safety
    /// `ptr` must come from `allocate_array::<T>(count)` on this allocator
    /// and its contents must already be dropped
    unsafe fn deallocate_array<T>(&self, ptr: NonNull<T>, count: usize) {
        if let Ok(layout) = Layout::array::<T>(count) {
            if layout.size() != 0 {
                self.deallocate(ptr.cast(), layout.size(), layout.align());
            }
        }
    }
}

impl<A: Allocator + ?Sized> TypedAllocator for A {}

impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size, align)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        (**self).deallocate(ptr, size, align)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn used(&self) -> usize {
        (**self).used()
    }
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size, align)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        (**self).deallocate(ptr, size, align)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn used(&self) -> usize {
        (**self).used()
    }
}

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Check if a pointer is aligned
#[inline]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}

pub mod prelude {
    pub use crate::{Allocator, TypedAllocator, Heap, Limit, Pool};
    pub use crate::{align_up, is_aligned};
}
