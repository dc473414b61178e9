//! SparseSet - paged key set with densely packed iteration
//!
//! Used in ECS-style registries to track which entities own a component:
//! O(1) membership tests, O(1) insertion and removal, and iteration over a
//! contiguous slice.

use core::fmt;
use core::slice;

use tessera_core::{Error, Location, Result, SparseIndex, SparseKey};
use tessera_memory::{Allocator, Heap};

use crate::dense::DenseStore;
use crate::sparse::{swap_and_pop, PagedIndex, DEFAULT_PAGE_SIZE};

/// Set of small integer keys
///
/// Iteration order is insertion order, perturbed by removals: erasing a key
/// moves the last key into its place.
pub struct SparseSet<K, I = u32, A = Heap, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Packed keys, the source of truth for iteration
    dense: DenseStore<K, A>,
    /// Key -> dense index
    sparse: PagedIndex<I, A, PAGE_SIZE>,
}

impl<K, I, A, const PAGE_SIZE: usize> SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    /// Create a new empty sparse set
    pub fn new() -> Self {
        Self::new_in(A::default())
    }

    /// Create with room for `capacity` keys
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::with_capacity_in(capacity, A::default())
    }
}

impl<K, I, A, const PAGE_SIZE: usize> SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Create a new empty sparse set drawing from `alloc`
    pub fn new_in(alloc: A) -> Self {
        Self {
            dense: DenseStore::new_in(alloc.clone()),
            sparse: PagedIndex::new_in(alloc),
        }
    }

    /// Create with room for `capacity` keys, drawing from `alloc`
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut set = Self::new_in(alloc);
        set.reserve(capacity)?;
        Ok(set)
    }

    /// Get the number of keys
    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Number of allocated index pages
    #[inline]
    pub fn page_count(&self) -> usize {
        self.sparse.page_count()
    }

    /// Number of keys the dense store holds without growing
    pub fn capacity(&self) -> usize {
        self.dense.capacity()
    }

    /// Get the allocator
    pub fn allocator(&self) -> &A {
        self.dense.allocator()
    }

    /// Check if the set contains a key
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.index_of(key).is_some()
    }

    /// Position of a key in the dense store
    #[inline]
    pub fn index_of(&self, key: K) -> Option<usize> {
        let index = self.sparse.lookup(key)?;
        debug_assert_eq!(self.dense.get(index), Some(&key));
        Some(index)
    }

    /// Get the stored key
    pub fn find(&self, key: K) -> Option<&K> {
        self.index_of(key).map(|index| &self.dense[index])
    }

    /// Iterate over the dense store starting at `key`
    pub fn iter_from(&self, key: K) -> Option<slice::Iter<'_, K>> {
        self.index_of(key).map(|index| self.dense[index..].iter())
    }

    /// Insert a key
    ///
    /// Returns `Ok(false)` if the key was already present. On failure the set
    /// is left unchanged.
    pub fn emplace(&mut self, key: K) -> Result<bool> {
        let loc = Self::locate(key)?;
        if self.sparse.get(loc).is_some() {
            return Ok(false);
        }

        self.append(loc, key)?;
        Ok(true)
    }

    /// Get the stored key, inserting it first if needed
    pub fn get_or_insert(&mut self, key: K) -> Result<&K> {
        let loc = Self::locate(key)?;
        let index = match self.sparse.get(loc) {
            Some(index) => index,
            None => self.append(loc, key)?,
        };
        Ok(&self.dense[index])
    }

    /// Remove a key, returning whether it was present
    pub fn erase(&mut self, key: K) -> bool {
        match Self::locate(key) {
            Ok(loc) => swap_and_pop(&mut self.dense, &mut self.sparse, loc, |k| *k).is_some(),
            Err(_) => false,
        }
    }

    /// Keep only the keys for which `f` returns true
    pub fn retain(&mut self, mut f: impl FnMut(&K) -> bool) {
        let mut index = 0;
        while index < self.dense.len() {
            let key = self.dense[index];
            if f(&key) {
                index += 1;
            } else {
                // The last key moves into `index` and is visited next
                self.erase(key);
            }
        }
    }

    /// Remove every key and release the index pages
    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
    }

    /// Make room for `additional` more keys in the dense store
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.dense.try_reserve(additional)
    }

    /// Iterate over keys in dense order
    pub fn iter(&self) -> slice::Iter<'_, K> {
        self.dense.iter()
    }

    /// Get the dense array directly
    pub fn as_slice(&self) -> &[K] {
        self.dense.as_slice()
    }

    /// Copy the set, rebuilding the index table from the copied keys
    pub fn try_clone(&self) -> Result<Self> {
        let dense = self.dense.try_clone()?;
        let mut sparse = PagedIndex::new_in(self.allocator().clone());
        sparse.rebuild(dense.iter().copied())?;
        Ok(Self { dense, sparse })
    }

    fn locate(key: K) -> Result<Location> {
        key.locate(PAGE_SIZE).ok_or(Error::KeyOutOfRange { key: key.to_u64() })
    }

    /// Append `key` and map it, rolling the append back if the table cannot grow
    fn append(&mut self, loc: Location, key: K) -> Result<usize> {
        let position = self.dense.len();
        let index = I::from_usize(position).ok_or(Error::IndexOverflow { limit: I::LIMIT })?;

        self.dense.push(key)?;
        if let Err(err) = self.sparse.ensure_page(loc.page) {
            self.dense.pop();
            return Err(err);
        }

        self.sparse.set(loc, index);
        Ok(position)
    }
}

impl<K, I, A, const PAGE_SIZE: usize> Default for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, I, A, const PAGE_SIZE: usize> Clone for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|err| err.handle())
    }
}

impl<K, I, A, const PAGE_SIZE: usize> PartialEq for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|key| other.contains(*key))
    }
}

impl<K, I, A, const PAGE_SIZE: usize> Eq for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
}

impl<K, I, A, const PAGE_SIZE: usize> fmt::Debug for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K, I, A, const PAGE_SIZE: usize> Extend<K> for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for key in iter {
            if let Err(err) = self.emplace(key) {
                err.handle();
            }
        }
    }
}

impl<K, I, A, const PAGE_SIZE: usize> FromIterator<K> for SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'a, K, I, A, const PAGE_SIZE: usize> IntoIterator for &'a SparseSet<K, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    type Item = &'a K;
    type IntoIter = slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use core::marker::PhantomData;

    use serde::de::{self, Deserialize, Deserializer, SeqAccess, Visitor};
    use serde::ser::{Serialize, Serializer};

    use super::*;

    impl<K, I, A, const PAGE_SIZE: usize> Serialize for SparseSet<K, I, A, PAGE_SIZE>
    where
        K: SparseKey + Serialize,
        I: SparseIndex,
        A: Allocator + Clone,
    {
        fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
            serializer.collect_seq(self.iter())
        }
    }

    impl<'de, K, I, A, const PAGE_SIZE: usize> Deserialize<'de> for SparseSet<K, I, A, PAGE_SIZE>
    where
        K: SparseKey + Deserialize<'de>,
        I: SparseIndex,
        A: Allocator + Clone + Default,
    {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
            struct SetVisitor<K, I, A, const PAGE_SIZE: usize>(PhantomData<(K, I, A)>);

            impl<'de, K, I, A, const PAGE_SIZE: usize> Visitor<'de> for SetVisitor<K, I, A, PAGE_SIZE>
            where
                K: SparseKey + Deserialize<'de>,
                I: SparseIndex,
                A: Allocator + Clone + Default,
            {
                type Value = SparseSet<K, I, A, PAGE_SIZE>;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a sequence of keys")
                }

                fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> core::result::Result<Self::Value, S::Error> {
                    let mut set = SparseSet::new();
                    while let Some(key) = seq.next_element()? {
                        set.emplace(key).map_err(de::Error::custom)?;
                    }
                    Ok(set)
                }
            }

            deserializer.deserialize_seq(SetVisitor::<K, I, A, PAGE_SIZE>(PhantomData))
        }
    }
}
