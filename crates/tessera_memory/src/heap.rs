//! Heap allocator - the global allocator behind the `Allocator` trait

use core::ptr::NonNull;
use std::alloc::{self, Layout};

#[cfg(feature = "tracking")]
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::Allocator;

#[cfg(feature = "tracking")]
static HEAP_USED: AtomicUsize = AtomicUsize::new(0);

/// Stateless handle to the global allocator
///
/// Every `Heap` value is interchangeable: memory allocated through one copy
/// may be released through any other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Heap;

impl Allocator for Heap {
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align).ok()?;
        if size == 0 {
            return NonNull::new(align as *mut u8);
        }

        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;

        #[cfg(feature = "tracking")]
        HEAP_USED.fetch_add(size, Ordering::Relaxed);

        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if size == 0 {
            return;
        }

        #[cfg(feature = "tracking")]
        HEAP_USED.fetch_sub(size, Ordering::Relaxed);

        alloc::dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(size, align));
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }

    /// Bytes currently held through `Heap` (requires the `tracking` feature)
    fn used(&self) -> usize {
        #[cfg(feature = "tracking")]
        {
            HEAP_USED.load(Ordering::Relaxed)
        }
        #[cfg(not(feature = "tracking"))]
        {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocation() {
        let ptr = Heap.allocate(64, 16).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 16, 0);

        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 64);
            assert_eq!(*ptr.as_ptr().add(63), 0xAB);
            Heap.deallocate(ptr, 64, 16);
        }
    }

    #[test]
    fn test_invalid_alignment() {
        assert!(Heap.allocate(8, 3).is_none());
    }

    #[test]
    fn test_unbounded() {
        assert_eq!(Heap.capacity(), usize::MAX);
        assert!(Heap.available() > 0);
    }
}
