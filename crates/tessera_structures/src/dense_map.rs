//! DenseMap - thread-safe paged map with separately locked storage
//!
//! The dense store and the index table each sit behind their own
//! `parking_lot::RwLock`. Readers take both shared, mutators take both
//! exclusive, and the pair is only ever acquired through [`Locked`], which
//! always locks the dense store first and the index table second.
//!
//! ```text
//! dense  (lock #1)   [ (63,d) (31,b) (32,c) ]
//! sparse (lock #2)   page 0: [.. 31 -> 1 ..]   page 1: [0 -> 2 .. 31 -> 0]
//! ```

use core::fmt;
use core::mem;

use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tessera_core::{Error, Location, Result, SparseIndex, SparseKey};
use tessera_memory::{Allocator, Heap};

use crate::dense::DenseStore;
use crate::sparse::{swap_and_pop, PagedIndex, DEFAULT_PAGE_SIZE};
use crate::sparse_map::{Iter, Node, SparseMap};

type Store<K, V, A> = DenseStore<Node<K, V>, A>;

/// Both locks of one map, acquired dense-then-sparse
///
/// Fields drop in declaration order, so the dense lock is also released
/// first.
struct Locked<D, S> {
    dense: D,
    sparse: S,
}

type Shared<'a, K, V, I, A, const PAGE_SIZE: usize> =
    Locked<RwLockReadGuard<'a, Store<K, V, A>>, RwLockReadGuard<'a, PagedIndex<I, A, PAGE_SIZE>>>;

type Exclusive<'a, K, V, I, A, const PAGE_SIZE: usize> =
    Locked<RwLockWriteGuard<'a, Store<K, V, A>>, RwLockWriteGuard<'a, PagedIndex<I, A, PAGE_SIZE>>>;

/// Concurrent map from small integer keys to values
///
/// Every method takes `&self`; the map can be shared behind an `Arc` and
/// mutated from many threads. Calls block until the locks they need are
/// available.
///
/// Cloning is deliberately not offered: use [`DenseMap::snapshot`] to copy
/// the contents under a consistent read lock.
pub struct DenseMap<K, V, I = u32, A = Heap, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Lock #1: packed nodes and their allocator
    dense: CachePadded<RwLock<Store<K, V, A>>>,
    /// Lock #2: key -> dense index
    sparse: CachePadded<RwLock<PagedIndex<I, A, PAGE_SIZE>>>,
}

impl<K, V, I, A, const PAGE_SIZE: usize> DenseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    /// Create a new empty map
    pub fn new() -> Self {
        Self::new_in(A::default())
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> DenseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Create a new empty map drawing from `alloc`
    pub fn new_in(alloc: A) -> Self {
        Self::from_parts(DenseStore::new_in(alloc.clone()), PagedIndex::new_in(alloc))
    }

    fn from_parts(dense: Store<K, V, A>, sparse: PagedIndex<I, A, PAGE_SIZE>) -> Self {
        Self {
            dense: CachePadded::new(RwLock::new(dense)),
            sparse: CachePadded::new(RwLock::new(sparse)),
        }
    }

    fn lock_shared(&self) -> Shared<'_, K, V, I, A, PAGE_SIZE> {
        let dense = self.dense.read();
        let sparse = self.sparse.read();
        Locked { dense, sparse }
    }

    fn lock_exclusive(&self) -> Exclusive<'_, K, V, I, A, PAGE_SIZE> {
        let dense = self.dense.write();
        let sparse = self.sparse.write();
        Locked { dense, sparse }
    }

    fn locate(key: K) -> Result<Location> {
        key.locate(PAGE_SIZE).ok_or(Error::KeyOutOfRange { key: key.to_u64() })
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.lock_shared().dense.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.lock_shared().dense.is_empty()
    }

    /// Number of allocated index pages
    pub fn page_count(&self) -> usize {
        self.lock_shared().sparse.page_count()
    }

    /// Check if the map contains a key
    pub fn contains(&self, key: K) -> bool {
        self.lock_shared().sparse.lookup(key).is_some()
    }

    /// Run `f` on a key's value under the shared locks
    pub fn with<R>(&self, key: K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let locked = self.lock_shared();
        let index = locked.sparse.lookup(key)?;
        Some(f(&locked.dense[index].value))
    }

    /// Run `f` on a key's value under the exclusive locks
    pub fn with_mut<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut locked = self.lock_exclusive();
        let index = locked.sparse.lookup(key)?;
        Some(f(&mut locked.dense[index].value))
    }

    /// Get a copy of a key's value
    pub fn get(&self, key: K) -> Option<V>
    where
        V: Clone,
    {
        self.with(key, V::clone)
    }

    /// Get a copy of a key's value, failing with `KeyNotFound` if absent
    pub fn at(&self, key: K) -> Result<V>
    where
        V: Clone,
    {
        self.get(key).ok_or(Error::KeyNotFound { key: key.to_u64() })
    }

    /// Insert a value if the key is absent
    ///
    /// Returns `Ok(false)` and keeps the existing value if the key is present.
    /// On failure the map is left unchanged.
    pub fn emplace(&self, key: K, value: V) -> Result<bool> {
        let loc = Self::locate(key)?;
        let mut locked = self.lock_exclusive();
        if locked.sparse.get(loc).is_some() {
            return Ok(false);
        }

        locked.append(loc, Node { key, value })?;
        Ok(true)
    }

    /// Insert or overwrite a value, returning the previous one
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        let loc = Self::locate(key)?;
        let mut locked = self.lock_exclusive();
        match locked.sparse.get(loc) {
            Some(index) => Ok(Some(mem::replace(&mut locked.dense[index].value, value))),
            None => {
                locked.append(loc, Node { key, value })?;
                Ok(None)
            }
        }
    }

    /// Overwrite the value of a present key
    ///
    /// Does nothing and returns `false` if the key is absent.
    pub fn set(&self, key: K, value: V) -> bool {
        self.with_mut(key, |slot| *slot = value).is_some()
    }

    /// Run `f` on a key's value, inserting `make()` first if needed
    ///
    /// The lookup, the insertion and `f` all happen under one exclusive
    /// locking, so no other thread can observe the freshly made value before
    /// `f` has run.
    pub fn get_or_insert_with<R>(
        &self,
        key: K,
        make: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> Result<R> {
        let loc = Self::locate(key)?;
        let mut locked = self.lock_exclusive();
        let index = match locked.sparse.get(loc) {
            Some(index) => index,
            None => locked.append(loc, Node { key, value: make() })?,
        };
        Ok(f(&mut locked.dense[index].value))
    }

    /// Remove a key, returning its value if it was present
    pub fn erase(&self, key: K) -> Option<V> {
        let loc = Self::locate(key).ok()?;
        let mut locked = self.lock_exclusive();
        let Locked { dense, sparse } = &mut locked;
        swap_and_pop(&mut **dense, &mut **sparse, loc, |node| node.key).map(|node| node.value)
    }

    /// Remove every entry and release the index pages
    pub fn clear(&self) {
        let mut locked = self.lock_exclusive();
        locked.dense.clear();
        locked.sparse.clear();
    }

    /// Hold both shared locks for a batch of reads or an iteration
    pub fn read(&self) -> DenseMapRef<'_, K, V, I, A, PAGE_SIZE> {
        DenseMapRef {
            locked: self.lock_shared(),
        }
    }

    /// Copy the contents into a single-threaded map
    ///
    /// The copy is taken under the shared locks, so it reflects one point in
    /// time. Its index table is rebuilt from the copied nodes.
    pub fn snapshot(&self) -> Result<SparseMap<K, V, I, A, PAGE_SIZE>>
    where
        V: Clone,
    {
        let dense = self.lock_shared().dense.try_clone()?;
        SparseMap::from_dense(dense)
    }

    /// Exchange the contents of two maps
    ///
    /// Both locks of both maps are held while the payloads move. Maps are
    /// locked in address order so two threads swapping the same pair in
    /// opposite directions cannot deadlock.
    pub fn swap(&self, other: &Self) {
        if core::ptr::eq(self, other) {
            return;
        }

        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let mut a = first.lock_exclusive();
        let mut b = second.lock_exclusive();

        mem::swap(&mut *a.dense, &mut *b.dense);
        mem::swap(&mut *a.sparse, &mut *b.sparse);
    }

    /// Move the contents out, leaving an empty map with the same allocator
    pub fn take(&self) -> Self {
        let mut locked = self.lock_exclusive();
        let alloc = locked.dense.allocator().clone();
        let dense = mem::replace(&mut *locked.dense, DenseStore::new_in(alloc.clone()));
        let sparse = mem::replace(&mut *locked.sparse, PagedIndex::new_in(alloc));
        Self::from_parts(dense, sparse)
    }

    /// Convert into a single-threaded map without copying
    pub fn into_inner(self) -> SparseMap<K, V, I, A, PAGE_SIZE> {
        let dense = CachePadded::into_inner(self.dense).into_inner();
        let sparse = CachePadded::into_inner(self.sparse).into_inner();
        SparseMap::from_parts(dense, sparse)
    }
}

impl<'a, K, V, I, A, const PAGE_SIZE: usize> Exclusive<'a, K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Map `loc` to the next dense position, then append `node` there
    ///
    /// On failure the slot is reset to the sentinel and pages grown for `loc`
    /// are released again.
    fn append(&mut self, loc: Location, node: Node<K, V>) -> Result<usize> {
        let position = self.dense.len();
        let index = I::from_usize(position).ok_or(Error::IndexOverflow { limit: I::LIMIT })?;

        let pages = self.sparse.page_count();
        self.sparse.ensure_page(loc.page)?;
        self.sparse.set(loc, index);

        if let Err(err) = self.dense.push(node) {
            log::warn!("Dense append for slot {} failed, vacating index slot", loc);
            self.sparse.vacate(loc);
            self.sparse.truncate(pages);
            return Err(err);
        }

        Ok(position)
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> Default for DenseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> From<SparseMap<K, V, I, A, PAGE_SIZE>> for DenseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn from(map: SparseMap<K, V, I, A, PAGE_SIZE>) -> Self {
        let (dense, sparse) = map.into_parts();
        Self::from_parts(dense, sparse)
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> fmt::Debug for DenseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: fmt::Debug,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.read();
        f.debug_map().entries(view.iter()).finish()
    }
}

/// Read view of a [`DenseMap`] holding both shared locks
///
/// Writers block until the view is dropped.
pub struct DenseMapRef<'a, K, V, I, A, const PAGE_SIZE: usize>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    locked: Shared<'a, K, V, I, A, PAGE_SIZE>,
}

impl<'a, K, V, I, A, const PAGE_SIZE: usize> DenseMapRef<'a, K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.locked.dense.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.locked.dense.is_empty()
    }

    /// Check if the map contains a key
    pub fn contains(&self, key: K) -> bool {
        self.locked.sparse.lookup(key).is_some()
    }

    /// Position of a key's node in the dense store
    pub fn index_of(&self, key: K) -> Option<usize> {
        self.locked.sparse.lookup(key)
    }

    /// Get a reference to a value
    pub fn get(&self, key: K) -> Option<&V> {
        let index = self.locked.sparse.lookup(key)?;
        Some(&self.locked.dense[index].value)
    }

    /// Get the dense nodes directly
    pub fn nodes(&self) -> &[Node<K, V>] {
        self.locked.dense.as_slice()
    }

    /// Iterate over entries in dense order
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.locked.dense.iter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_memory::Limit;

    #[test]
    fn test_dense_map_basic() {
        let map: DenseMap<u32, i32> = DenseMap::new();

        assert!(map.emplace(5, 50).unwrap());
        assert!(!map.emplace(5, 55).unwrap());
        assert_eq!(map.insert(6, 60).unwrap(), None);
        assert_eq!(map.insert(6, 61).unwrap(), Some(60));

        assert_eq!(map.get(5), Some(50));
        assert_eq!(map.get(6), Some(61));
        assert_eq!(map.len(), 2);
        assert!(map.contains(5));
        assert!(!map.contains(7));
    }

    #[test]
    fn test_page_scenario() {
        let map: DenseMap<u32, char> = DenseMap::new();
        for (key, value) in [(0, 'a'), (31, 'b'), (32, 'c'), (63, 'd')] {
            map.emplace(key, value).unwrap();
        }
        assert_eq!(map.page_count(), 2);

        assert_eq!(map.erase(0), Some('a'));
        assert!(!map.contains(0));
        assert_eq!(map.len(), 3);

        let view = map.read();
        assert_eq!(view.nodes()[0].key(), 63);
        assert_eq!(view.get(63), Some(&'d'));
        assert_eq!(view.index_of(63), Some(0));
    }

    #[test]
    fn test_absent_key_outcomes() {
        let map: DenseMap<u32, i32> = DenseMap::new();
        map.emplace(1, 1).unwrap();

        assert_eq!(map.erase(2), None);
        assert!(!map.set(2, 5));
        assert_eq!(map.at(2), Err(Error::KeyNotFound { key: 2 }));
        assert_eq!(map.with(2, |v| *v), None);
        assert_eq!(map.len(), 1);

        assert!(map.set(1, 5));
        assert_eq!(map.at(1), Ok(5));
    }

    #[test]
    fn test_get_or_insert_with() {
        let map: DenseMap<u32, Vec<u32>> = DenseMap::new();
        let len = map.get_or_insert_with(3, Vec::new, |v| {
            v.push(1);
            v.len()
        });
        assert_eq!(len, Ok(1));

        let len = map.get_or_insert_with(3, || unreachable!(), |v| {
            v.push(2);
            v.len()
        });
        assert_eq!(len, Ok(2));
        assert_eq!(map.get(3), Some(vec![1, 2]));
    }

    #[test]
    fn test_dense_failure_vacates_slot() {
        let limit = Limit::new(Heap);
        let map: DenseMap<u32, u64, u32, Limit> = DenseMap::new_in(limit.clone());
        for key in 0..4 {
            map.emplace(key, key as u64).unwrap();
        }

        // Page 0 already exists; only the dense store needs to grow
        limit.set_remaining(0);
        assert!(map.emplace(4, 4).is_err());
        assert!(!map.contains(4));
        assert_eq!(map.len(), 4);

        // A far key gets its pages (1, 2 and 3) but no dense slot, so the
        // pages are given back
        limit.set_remaining(3);
        let blocks = limit.live_blocks();
        assert!(map.emplace(100, 100).is_err());
        assert!(!map.contains(100));
        assert_eq!(map.page_count(), 1);
        assert_eq!(limit.live_blocks(), blocks);

        limit.unlimit();
        assert!(map.emplace(4, 4).unwrap());
        assert_eq!(map.get(4), Some(4));
        assert!(map.emplace(100, 100).unwrap());
        assert_eq!(map.page_count(), 4);
    }

    #[test]
    fn test_page_failure_rolls_back() {
        let limit = Limit::new(Heap);
        let map: DenseMap<u32, u64, u32, Limit> = DenseMap::new_in(limit.clone());
        map.emplace(1, 1).unwrap();
        let blocks = limit.live_blocks();

        // The dense store has room; page 1 is allocated, page 2 is refused
        limit.set_remaining(1);
        let err = map.emplace(70, 70).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
        assert!(!map.contains(70));
        assert_eq!(map.len(), 1);
        assert_eq!(map.page_count(), 1);
        assert_eq!(limit.live_blocks(), blocks);

        let err = map.get_or_insert_with(70, || 70, |v| *v).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
        assert_eq!(map.get(1), Some(1));
    }

    #[test]
    fn test_swap_and_take() {
        let a: DenseMap<u32, &str> = DenseMap::new();
        let b: DenseMap<u32, &str> = DenseMap::new();
        a.emplace(1, "a1").unwrap();
        b.emplace(2, "b2").unwrap();
        b.emplace(40, "b40").unwrap();

        a.swap(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(40), Some("b40"));
        assert_eq!(b.get(1), Some("a1"));
        assert!(!b.contains(2));

        a.swap(&a);
        assert_eq!(a.len(), 2);

        let taken = a.take();
        assert!(a.is_empty());
        assert_eq!(a.page_count(), 0);
        assert_eq!(taken.get(2), Some("b2"));
    }

    #[test]
    fn test_snapshot_and_into_inner() {
        let map: DenseMap<u32, String> = DenseMap::new();
        map.emplace(7, "seven".to_string()).unwrap();
        map.emplace(70, "seventy".to_string()).unwrap();

        let snapshot = map.snapshot().unwrap();
        map.erase(7);
        assert_eq!(snapshot.get(7).map(String::as_str), Some("seven"));
        assert_eq!(snapshot.len(), 2);

        let inner = map.into_inner();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner.at(70).unwrap(), "seventy");

        let back = DenseMap::from(inner);
        assert_eq!(back.get(70).as_deref(), Some("seventy"));
    }

    #[test]
    fn test_read_view_iteration() {
        let map: DenseMap<u32, u32> = DenseMap::new();
        for key in [9, 2, 5] {
            map.emplace(key, key * 10).unwrap();
        }

        let view = map.read();
        let forward: Vec<_> = view.iter().map(|(k, v)| (k, *v)).collect();
        let backward: Vec<_> = view.iter().rev().map(|(k, _)| k).collect();
        assert_eq!(forward, vec![(9, 90), (2, 20), (5, 50)]);
        assert_eq!(backward, vec![5, 2, 9]);
        assert_eq!(view.len(), 3);
        assert!(view.contains(2));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let map: Arc<DenseMap<u32, u32>> = Arc::new(DenseMap::new());
        for key in 0..64 {
            map.emplace(key, 0).unwrap();
        }

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 1..=100 {
                    for key in 0..64 {
                        map.set(key, round);
                    }
                }
            });
            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let view = map.read();
                        assert_eq!(view.len(), 64);
                        assert!(view.iter().all(|(k, _)| view.contains(k)));
                    }
                });
            }
        });

        assert!(map.read().iter().all(|(_, v)| *v == 100));
    }
}
