//! Paged index table - key position to dense index, one fixed-size page at a time
//!
//! Pages are allocated lazily through the table's allocator and only released
//! all at once, on `clear` or drop. Growth is transactional: a failed
//! `ensure_page` leaves the table exactly as it found it.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use tessera_core::{Error, Location, Result, SparseIndex, SparseKey};
use tessera_memory::{Allocator, Heap, TypedAllocator};

use crate::dense::DenseStore;

/// Page size used when none is given
pub const DEFAULT_PAGE_SIZE: usize = 32;

/// Growable list of fixed-size index pages
pub struct PagedIndex<I: SparseIndex, A: Allocator = Heap, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    pages: Vec<NonNull<[I; PAGE_SIZE]>>,
    alloc: A,
}

// Safety: pages are uniquely owned by the table, like a `Vec<Box<[I; N]>>`
unsafe impl<I: SparseIndex, A: Allocator + Send, const PAGE_SIZE: usize> Send for PagedIndex<I, A, PAGE_SIZE> {}
unsafe impl<I: SparseIndex, A: Allocator + Sync, const PAGE_SIZE: usize> Sync for PagedIndex<I, A, PAGE_SIZE> {}

impl<I: SparseIndex, A: Allocator + Default, const PAGE_SIZE: usize> PagedIndex<I, A, PAGE_SIZE> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::new_in(A::default())
    }
}

impl<I: SparseIndex, A: Allocator + Default, const PAGE_SIZE: usize> Default for PagedIndex<I, A, PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: SparseIndex, A: Allocator, const PAGE_SIZE: usize> PagedIndex<I, A, PAGE_SIZE> {
    const VALID_PAGE_SIZE: () = assert!(PAGE_SIZE > 0, "page size must be positive");

    /// Create an empty table drawing pages from `alloc`
    pub fn new_in(alloc: A) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_PAGE_SIZE;
        Self {
            pages: Vec::new(),
            alloc,
        }
    }

    /// Number of slots per page
    #[inline]
    pub const fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Number of allocated pages
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get the allocator
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Page coordinates of a key, `None` if the key has no position
    #[inline]
    pub fn locate<K: SparseKey>(key: K) -> Option<Location> {
        key.locate(PAGE_SIZE)
    }

    /// Make sure page `page` exists, allocating every missing page before it
    ///
    /// On failure every page added by this call is released again.
    pub fn ensure_page(&mut self, page: usize) -> Result<()> {
        let needed = page.checked_add(1).ok_or(Error::CapacityOverflow)?;
        let previous = self.pages.len();
        if needed <= previous {
            return Ok(());
        }

        if self.pages.try_reserve(needed - previous).is_err() {
            let layout = Layout::array::<NonNull<[I; PAGE_SIZE]>>(needed)?;
            return Err(Error::allocation(layout));
        }

        while self.pages.len() < needed {
            match self.alloc.allocate_array::<[I; PAGE_SIZE]>(1) {
                Ok(page) => {
                    unsafe { page.as_ptr().write([I::VACANT; PAGE_SIZE]) };
                    self.pages.push(page);
                }
                Err(err) => {
                    log::warn!(
                        "Index page {} allocation failed, rolling back {} new pages",
                        self.pages.len(),
                        self.pages.len() - previous
                    );
                    self.release_pages(previous);
                    return Err(err);
                }
            }
        }

        log::trace!("Index table grew from {} to {} pages", previous, needed);
        Ok(())
    }

    /// Dense index recorded at `loc`
    ///
    /// # Panics
    /// If `loc.offset` is not below `PAGE_SIZE`
    #[inline]
    pub fn get(&self, loc: Location) -> Option<usize> {
        debug_assert!(loc.offset < PAGE_SIZE, "offset {} outside page of {}", loc.offset, PAGE_SIZE);
        let page = self.pages.get(loc.page)?;
        let slot = unsafe { page.as_ref()[loc.offset] };
        (!slot.is_vacant()).then(|| slot.to_usize())
    }

    /// Dense index recorded for `key`
    #[inline]
    pub fn lookup<K: SparseKey>(&self, key: K) -> Option<usize> {
        self.get(Self::locate(key)?)
    }

    /// Record `index` at `loc`
    ///
    /// # Panics
    /// If the page for `loc` has not been allocated, or `loc.offset` is not
    /// below `PAGE_SIZE`
    #[inline]
    pub fn set(&mut self, loc: Location, index: I) {
        debug_assert!(loc.offset < PAGE_SIZE, "offset {} outside page of {}", loc.offset, PAGE_SIZE);
        self.page_mut(loc.page)[loc.offset] = index;
    }

    /// Reset the slot at `loc` to the vacant sentinel, returning what it held
    ///
    /// # Panics
    /// If `loc.offset` is not below `PAGE_SIZE`
    #[inline]
    pub fn vacate(&mut self, loc: Location) -> Option<I> {
        debug_assert!(loc.offset < PAGE_SIZE, "offset {} outside page of {}", loc.offset, PAGE_SIZE);
        let page = self.pages.get_mut(loc.page)?;
        let slot = unsafe { &mut page.as_mut()[loc.offset] };
        let previous = core::mem::replace(slot, I::VACANT);
        (!previous.is_vacant()).then_some(previous)
    }

    /// Number of slots holding an index (O(pages))
    pub fn occupied(&self) -> usize {
        self.pages
            .iter()
            .map(|page| unsafe { page.as_ref() }.iter().filter(|slot| !slot.is_vacant()).count())
            .sum()
    }

    /// Release the pages past the first `len`
    ///
    /// Used to undo growth whose slot was never filled. Does nothing if the
    /// table has at most `len` pages.
    pub fn truncate(&mut self, len: usize) {
        if len < self.pages.len() {
            log::debug!("Releasing index pages {}..{}", len, self.pages.len());
            self.release_pages(len);
        }
    }

    /// Release every page
    pub fn clear(&mut self) {
        if !self.pages.is_empty() {
            log::debug!("Releasing {} index pages", self.pages.len());
        }
        self.release_pages(0);
    }

    /// Re-derive the whole table from keys in dense order
    ///
    /// Key `keys[i]` ends up mapped to dense index `i`. On failure the table
    /// is left empty.
    pub fn rebuild<K: SparseKey>(&mut self, keys: impl IntoIterator<Item = K>) -> Result<()> {
        self.clear();

        for (position, key) in keys.into_iter().enumerate() {
            if let Err(err) = self.record(key, position) {
                self.clear();
                return Err(err);
            }
        }

        log::debug!("Rebuilt index table with {} pages", self.pages.len());
        Ok(())
    }

    fn record<K: SparseKey>(&mut self, key: K, position: usize) -> Result<()> {
        let loc = Self::locate(key).ok_or(Error::KeyOutOfRange { key: key.to_u64() })?;
        let index = I::from_usize(position).ok_or(Error::IndexOverflow { limit: I::LIMIT })?;
        self.ensure_page(loc.page)?;
        self.set(loc, index);
        Ok(())
    }

    fn page_mut(&mut self, page: usize) -> &mut [I; PAGE_SIZE] {
        unsafe { self.pages[page].as_mut() }
    }

    /// Free pages `keep..` and shrink the list back to `keep` entries
    fn release_pages(&mut self, keep: usize) {
        for page in self.pages.drain(keep..) {
            unsafe { self.alloc.deallocate_array(page, 1) };
        }
    }
}

impl<I: SparseIndex, A: Allocator, const PAGE_SIZE: usize> Drop for PagedIndex<I, A, PAGE_SIZE> {
    fn drop(&mut self) {
        self.release_pages(0);
    }
}

impl<I: SparseIndex, A: Allocator, const PAGE_SIZE: usize> fmt::Debug for PagedIndex<I, A, PAGE_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedIndex")
            .field("page_size", &PAGE_SIZE)
            .field("pages", &self.pages.len())
            .finish()
    }
}

/// Remove the element mapped at `removed` by swap-and-pop
///
/// The last dense element moves into the freed position and its slot is
/// re-pointed there. Returns `None` if nothing is mapped at `removed`.
pub fn swap_and_pop<T, K, I, A, B, const PAGE_SIZE: usize>(
    dense: &mut DenseStore<T, A>,
    table: &mut PagedIndex<I, B, PAGE_SIZE>,
    removed: Location,
    key_of: impl Fn(&T) -> K,
) -> Option<T>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator,
    B: Allocator,
{
    let index = table.vacate(removed)?;
    let position = index.to_usize();
    debug_assert!(position < dense.len(), "index slot points past the dense store");

    let value = dense.swap_remove(position);
    if let Some(moved) = dense.get(position) {
        if let Some(loc) = key_of(moved).locate(PAGE_SIZE) {
            table.set(loc, index);
        }
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_memory::{Limit, Pool};
    use std::sync::Arc;

    fn loc(key: usize) -> Location {
        Location::of(key, 32)
    }

    #[test]
    fn test_pages_grow_lazily() {
        let mut table: PagedIndex<u32> = PagedIndex::new();
        assert_eq!(table.page_count(), 0);
        assert_eq!(table.lookup(5u32), None);

        table.ensure_page(2).unwrap();
        assert_eq!(table.page_count(), 3);

        table.ensure_page(1).unwrap();
        assert_eq!(table.page_count(), 3);
        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn test_zero_is_not_vacant() {
        let mut table: PagedIndex<u32> = PagedIndex::new();
        table.ensure_page(0).unwrap();
        table.set(loc(7), 0);

        assert_eq!(table.get(loc(7)), Some(0));
        assert_eq!(table.get(loc(0)), None);
        assert_eq!(table.vacate(loc(7)), Some(0));
        assert_eq!(table.get(loc(7)), None);
        assert_eq!(table.vacate(loc(7)), None);
    }

    #[test]
    fn test_growth_rolls_back() {
        let limit = Limit::with_budget(Heap, 2);
        let mut table: PagedIndex<u32, Limit> = PagedIndex::new_in(limit.clone());

        table.ensure_page(0).unwrap();
        assert_eq!(limit.live_blocks(), 1);

        // Page 1 succeeds, page 2 fails: both are given back
        let err = table.ensure_page(2).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
        assert_eq!(table.page_count(), 1);
        assert_eq!(limit.live_blocks(), 1);

        limit.unlimit();
        table.ensure_page(2).unwrap();
        assert_eq!(table.page_count(), 3);
        drop(table);
        assert_eq!(limit.live_blocks(), 0);
    }

    #[test]
    #[should_panic]
    fn test_offset_past_page_panics() {
        let mut table: PagedIndex<u32> = PagedIndex::new();
        table.ensure_page(0).unwrap();
        table.set(Location { page: 0, offset: 32 }, 1);
    }

    #[test]
    fn test_truncate_releases_tail() {
        let limit = Limit::new(Heap);
        let mut table: PagedIndex<u32, Limit> = PagedIndex::new_in(limit.clone());
        table.ensure_page(3).unwrap();
        table.set(loc(5), 0);

        table.truncate(1);
        assert_eq!(table.page_count(), 1);
        assert_eq!(limit.live_blocks(), 1);
        assert_eq!(table.get(loc(5)), Some(0));

        table.truncate(4);
        assert_eq!(table.page_count(), 1);
    }

    #[test]
    fn test_pages_from_pool() {
        let pool = Arc::new(Pool::for_type::<[u16; 32]>(2).unwrap());
        let mut table: PagedIndex<u16, Arc<Pool>> = PagedIndex::new_in(pool.clone());

        table.ensure_page(1).unwrap();
        assert_eq!(pool.free_count(), 0);
        assert!(table.ensure_page(2).is_err());
        assert_eq!(table.page_count(), 2);

        table.clear();
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_rebuild() {
        let mut table: PagedIndex<u32> = PagedIndex::new();
        table.rebuild([40u32, 3, 100]).unwrap();

        assert_eq!(table.page_count(), 4);
        assert_eq!(table.lookup(40u32), Some(0));
        assert_eq!(table.lookup(3u32), Some(1));
        assert_eq!(table.lookup(100u32), Some(2));
        assert_eq!(table.occupied(), 3);
    }

    #[test]
    fn test_rebuild_index_overflow() {
        let mut table: PagedIndex<u8> = PagedIndex::new();
        let err = table.rebuild(0..300u32).unwrap_err();
        assert_eq!(err, Error::IndexOverflow { limit: 255 });
        assert_eq!(table.page_count(), 0);
    }

    #[test]
    fn test_swap_and_pop() {
        let mut dense: DenseStore<u32> = DenseStore::new();
        let mut table: PagedIndex<u32> = PagedIndex::new();
        for key in [0u32, 31, 32, 63] {
            dense.push(key).unwrap();
        }
        table.rebuild(dense.iter().copied()).unwrap();

        let removed = swap_and_pop(&mut dense, &mut table, loc(0), |k| *k);
        assert_eq!(removed, Some(0));
        assert_eq!(dense.as_slice(), &[63, 31, 32]);
        assert_eq!(table.lookup(63u32), Some(0));
        assert_eq!(table.lookup(0u32), None);

        assert_eq!(swap_and_pop(&mut dense, &mut table, loc(0), |k| *k), None);
    }
}
