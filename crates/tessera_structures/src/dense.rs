//! Dense packed store - contiguous, reorderable storage for live elements
//!
//! A minimal `Vec` whose buffer comes from an [`Allocator`]. Growth is
//! fallible and reported through [`Result`] instead of aborting.

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::slice;

use tessera_core::{Error, Result};
use tessera_memory::{Allocator, Heap, TypedAllocator};

/// Smallest non-zero capacity
const MIN_CAPACITY: usize = 4;

/// Contiguous element storage backed by an allocator
pub struct DenseStore<T, A: Allocator = Heap> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    alloc: A,
    _marker: PhantomData<T>,
}

// Safety: the store owns its elements like a `Vec<T>`
unsafe impl<T: Send, A: Allocator + Send> Send for DenseStore<T, A> {}
unsafe impl<T: Sync, A: Allocator + Sync> Sync for DenseStore<T, A> {}

impl<T, A: Allocator + Default> DenseStore<T, A> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::new_in(A::default())
    }
}

impl<T, A: Allocator + Default> Default for DenseStore<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator> DenseStore<T, A> {
    const IS_ZST: bool = mem::size_of::<T>() == 0;

    /// Create an empty store drawing from `alloc`
    pub fn new_in(alloc: A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: if Self::IS_ZST { usize::MAX } else { 0 },
            len: 0,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Create a store with room for `capacity` elements
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut store = Self::new_in(alloc);
        store.try_reserve(capacity)?;
        Ok(store)
    }

    /// Number of live elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the buffer holds without growing
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Get the allocator
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Make room for at least `additional` more elements
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let required = self.len.checked_add(additional).ok_or(Error::CapacityOverflow)?;
        if required <= self.cap {
            return Ok(());
        }

        let new_cap = required.max(self.cap.saturating_mul(2)).max(MIN_CAPACITY);
        self.grow_to(new_cap)
    }

    fn grow_to(&mut self, new_cap: usize) -> Result<()> {
        debug_assert!(!Self::IS_ZST);

        let new_ptr = self.alloc.allocate_array::<T>(new_cap)?;
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len);
            if self.cap != 0 {
                self.alloc.deallocate_array(self.ptr, self.cap);
            }
        }

        log::trace!("Dense store grew from {} to {} slots", self.cap, new_cap);
        self.ptr = new_ptr;
        self.cap = new_cap;
        Ok(())
    }

    /// Append an element
    ///
    /// On failure the store is unchanged and `value` is dropped.
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.len == self.cap {
            self.try_reserve(1)?;
        }

        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    /// Remove the last element
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        self.len -= 1;
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Remove the element at `index`, moving the last element into its place
    ///
    /// # Panics
    /// If `index` is out of bounds
    pub fn swap_remove(&mut self, index: usize) -> T {
        let len = self.len;
        assert!(index < len, "swap_remove index {} out of bounds (len {})", index, len);

        unsafe {
            let base = self.ptr.as_ptr();
            let value = base.add(index).read();
            // Move the last element into the hole (no-op when removing the last one)
            ptr::copy(base.add(len - 1), base.add(index), 1);
            self.len = len - 1;
            value
        }
    }

    /// Drop every element, keeping the buffer
    pub fn clear(&mut self) {
        let elements: *mut [T] = self.as_mut_slice();
        // Shrink first so a panicking destructor cannot cause a double drop
        self.len = 0;
        unsafe { ptr::drop_in_place(elements) };
    }

    /// View the live elements
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// View the live elements mutably
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Duplicate the store, including a clone of its allocator
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        A: Clone,
    {
        let mut store = Self::with_capacity_in(self.len, self.alloc.clone())?;
        for value in self.iter() {
            store.push(value.clone())?;
        }
        Ok(store)
    }
}

impl<T, A: Allocator> Deref for DenseStore<T, A> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator> DerefMut for DenseStore<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, A: Allocator> Drop for DenseStore<T, A> {
    fn drop(&mut self) {
        self.clear();
        if !Self::IS_ZST && self.cap != 0 {
            unsafe { self.alloc.deallocate_array(self.ptr, self.cap) };
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for DenseStore<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use tessera_memory::Limit;

    #[test]
    fn test_push_and_access() {
        let mut store: DenseStore<i32> = DenseStore::new();
        for i in 0..10 {
            store.push(i * 10).unwrap();
        }

        assert_eq!(store.len(), 10);
        assert_eq!(store[3], 30);
        assert_eq!(store.iter().rev().next(), Some(&90));
        assert!(store.capacity() >= 10);
    }

    #[test]
    fn test_swap_remove() {
        let mut store: DenseStore<&str> = DenseStore::new();
        for s in ["a", "b", "c", "d"] {
            store.push(s).unwrap();
        }

        assert_eq!(store.swap_remove(1), "b");
        assert_eq!(store.as_slice(), &["a", "d", "c"]);
        assert_eq!(store.swap_remove(2), "c");
        assert_eq!(store.as_slice(), &["a", "d"]);
        assert_eq!(store.pop(), Some("d"));
        assert_eq!(store.pop(), Some("a"));
        assert_eq!(store.pop(), None);
    }

    #[test]
    fn test_failed_growth_leaves_store_intact() {
        let limit = Limit::with_budget(Heap, 1);
        let mut store: DenseStore<u64, Limit> = DenseStore::new_in(limit.clone());

        for i in 0..MIN_CAPACITY as u64 {
            store.push(i).unwrap();
        }
        assert!(matches!(store.push(99), Err(Error::AllocationFailure { .. })));
        assert_eq!(store.as_slice(), &[0, 1, 2, 3]);

        limit.unlimit();
        store.push(4).unwrap();
        assert_eq!(store.len(), 5);
        drop(store);
        assert_eq!(limit.live_blocks(), 0);
    }

    #[test]
    fn test_drops_elements() {
        let tracker = Rc::new(());
        {
            let mut store: DenseStore<Rc<()>> = DenseStore::new();
            for _ in 0..5 {
                store.push(tracker.clone()).unwrap();
            }
            drop(store.swap_remove(0));
            assert_eq!(Rc::strong_count(&tracker), 5);
            store.clear();
            assert_eq!(Rc::strong_count(&tracker), 1);
            store.push(tracker.clone()).unwrap();
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_zero_sized() {
        let limit = Limit::with_budget(Heap, 0);
        let mut store: DenseStore<(), Limit> = DenseStore::new_in(limit.clone());
        for _ in 0..1000 {
            store.push(()).unwrap();
        }
        assert_eq!(store.len(), 1000);
        assert_eq!(limit.failures(), 0);
    }

    #[test]
    fn test_try_clone() {
        let mut store: DenseStore<String> = DenseStore::new();
        store.push("x".to_string()).unwrap();
        store.push("y".to_string()).unwrap();

        let copy = store.try_clone().unwrap();
        store.clear();
        assert_eq!(copy.as_slice(), &["x".to_string(), "y".to_string()]);
    }
}
