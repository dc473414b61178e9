//! SharedSparseMap - a `SparseMap` behind one reader-writer lock
//!
//! The simplest thread-safe option: every read shares the lock, every write
//! takes it exclusively. Not recommended under heavy write contention; see
//! [`DenseMap`](crate::DenseMap) for per-field locking.

use core::fmt;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tessera_core::{Error, Result, SparseIndex, SparseKey};
use tessera_memory::{Allocator, Heap};

use crate::sparse::DEFAULT_PAGE_SIZE;
use crate::sparse_map::SparseMap;

/// Coarse-grained thread-safe wrapper around [`SparseMap`]
pub struct SharedSparseMap<K, V, I = u32, A = Heap, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    inner: RwLock<SparseMap<K, V, I, A, PAGE_SIZE>>,
}

impl<K, V, I, A, const PAGE_SIZE: usize> SharedSparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    /// Create a new empty map
    pub fn new() -> Self {
        Self::from(SparseMap::new())
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> SharedSparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Create a new empty map drawing from `alloc`
    pub fn new_in(alloc: A) -> Self {
        Self::from(SparseMap::new_in(alloc))
    }

    /// Unwrap the map
    pub fn into_inner(self) -> SparseMap<K, V, I, A, PAGE_SIZE> {
        self.inner.into_inner()
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Check if the map contains a key
    pub fn contains(&self, key: K) -> bool {
        self.inner.read().contains(key)
    }

    /// Borrow a key's value, holding the shared lock until the guard drops
    pub fn at(&self, key: K) -> Result<MappedRwLockReadGuard<'_, V>> {
        RwLockReadGuard::try_map(self.inner.read(), |map| map.get(key))
            .map_err(|_| Error::KeyNotFound { key: key.to_u64() })
    }

    /// Get a copy of a key's value
    pub fn get(&self, key: K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().get(key).cloned()
    }

    /// Borrow a key's value, inserting `f()` first if needed
    ///
    /// The exclusive lock is held until the guard drops.
    pub fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> V) -> Result<MappedRwLockWriteGuard<'_, V>> {
        let mut map = self.inner.write();
        map.get_or_insert_with(key, f)?;
        RwLockWriteGuard::try_map(map, |map| map.get_mut(key))
            .map_err(|_| Error::KeyNotFound { key: key.to_u64() })
    }

    /// Borrow a key's value, inserting the default value first if needed
    pub fn get_or_insert(&self, key: K) -> Result<MappedRwLockWriteGuard<'_, V>>
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    /// Insert a value if the key is absent
    pub fn emplace(&self, key: K, value: V) -> Result<bool> {
        self.inner.write().emplace(key, value)
    }

    /// Insert or overwrite a value, returning the previous one
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.write().insert(key, value)
    }

    /// Overwrite the value of a present key, `false` if absent
    pub fn set(&self, key: K, value: V) -> bool {
        self.inner.write().set(key, value)
    }

    /// Remove a key, returning its value if it was present
    pub fn erase(&self, key: K) -> Option<V> {
        self.inner.write().erase(key)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Hold the shared lock, e.g. to iterate
    pub fn read(&self) -> RwLockReadGuard<'_, SparseMap<K, V, I, A, PAGE_SIZE>> {
        self.inner.read()
    }

    /// Hold the exclusive lock for a batch of updates
    pub fn write(&self) -> RwLockWriteGuard<'_, SparseMap<K, V, I, A, PAGE_SIZE>> {
        self.inner.write()
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> From<SparseMap<K, V, I, A, PAGE_SIZE>> for SharedSparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn from(map: SparseMap<K, V, I, A, PAGE_SIZE>) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> Default for SharedSparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> fmt::Debug for SharedSparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: fmt::Debug,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner.read(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_basic() {
        let map: SharedSparseMap<u32, String> = SharedSparseMap::new();
        assert!(map.is_empty());

        map.get_or_insert(3).unwrap().push_str("three");
        assert_eq!(&*map.at(3).unwrap(), "three");
        assert_eq!(map.at(4).err(), Some(Error::KeyNotFound { key: 4 }));
        assert_eq!(map.len(), 1);

        assert!(map.emplace(40, "forty".to_string()).unwrap());
        assert!(!map.set(41, "x".to_string()));
        assert_eq!(map.get(40).as_deref(), Some("forty"));

        assert_eq!(map.erase(3).as_deref(), Some("three"));
        assert!(!map.contains(3));
        assert_eq!(map.erase(3), None);
    }

    #[test]
    fn test_iteration_under_read_lock() {
        let map: SharedSparseMap<u32, u32> = SharedSparseMap::new();
        for key in 0..10 {
            map.insert(key, key + 100).unwrap();
        }

        let sum: u32 = map.read().values().sum();
        assert_eq!(sum, (100..110).sum::<u32>());

        map.clear();
        assert!(map.read().is_empty());
        assert_eq!(map.into_inner().page_count(), 0);
    }

    #[test]
    fn test_concurrent_counters() {
        let map: SharedSparseMap<u32, u64> = SharedSparseMap::new();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for key in 0..50 {
                        *map.get_or_insert(key).unwrap() += 1;
                    }
                });
            }
        });

        assert_eq!(map.len(), 50);
        assert!(map.read().values().all(|count| *count == 4));
    }
}
