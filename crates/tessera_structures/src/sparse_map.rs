//! SparseMap - paged key/value map with densely packed nodes
//!
//! Same layout as [`SparseSet`](crate::SparseSet), except that each dense slot
//! is a [`Node`] carrying its key next to the value. The key is what lets
//! swap-and-pop re-point the index slot of the node that moved.

use core::fmt;
use core::ops::Index;
use core::slice;

use tessera_core::{Error, Location, Result, SparseIndex, SparseKey};
use tessera_memory::{Allocator, Heap};

use crate::dense::DenseStore;
use crate::sparse::{swap_and_pop, PagedIndex, DEFAULT_PAGE_SIZE};

/// Key-carrying dense slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K: Copy, V> Node<K, V> {
    /// Create a node
    #[inline]
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Get the key
    #[inline]
    pub fn key(&self) -> K {
        self.key
    }

    /// Get the value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Get the value mutably
    #[inline]
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// Split into key and value
    #[inline]
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

/// Map from small integer keys to values
pub struct SparseMap<K, V, I = u32, A = Heap, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Packed nodes, the source of truth for iteration
    dense: DenseStore<Node<K, V>, A>,
    /// Key -> dense index
    sparse: PagedIndex<I, A, PAGE_SIZE>,
}

impl<K, V, I, A, const PAGE_SIZE: usize> SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    /// Create a new empty map
    pub fn new() -> Self {
        Self::new_in(A::default())
    }

    /// Create with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::with_capacity_in(capacity, A::default())
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Create a new empty map drawing from `alloc`
    pub fn new_in(alloc: A) -> Self {
        Self {
            dense: DenseStore::new_in(alloc.clone()),
            sparse: PagedIndex::new_in(alloc),
        }
    }

    /// Create with room for `capacity` entries, drawing from `alloc`
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut map = Self::new_in(alloc);
        map.reserve(capacity)?;
        Ok(map)
    }

    /// Assemble a map around an existing dense store, deriving the index table
    pub(crate) fn from_dense(dense: DenseStore<Node<K, V>, A>) -> Result<Self> {
        let mut sparse = PagedIndex::new_in(dense.allocator().clone());
        sparse.rebuild(dense.iter().map(|node| node.key))?;
        Ok(Self { dense, sparse })
    }

    /// Assemble a map from a consistent dense store and index table
    pub(crate) fn from_parts(dense: DenseStore<Node<K, V>, A>, sparse: PagedIndex<I, A, PAGE_SIZE>) -> Self {
        Self { dense, sparse }
    }

    pub(crate) fn into_parts(self) -> (DenseStore<Node<K, V>, A>, PagedIndex<I, A, PAGE_SIZE>) {
        (self.dense, self.sparse)
    }

    /// Get the number of entries
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

    /// Number of entries the dense store holds without growing
    pub fn capacity(&self) -> usize {
        self.dense.capacity()
    }

    /// Get the allocator
    pub fn allocator(&self) -> &A {
        self.dense.allocator()
    }

    /// Check if the map contains a key
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.index_of(key).is_some()
    }

    /// Position of a key's node in the dense store
    #[inline]
    pub fn index_of(&self, key: K) -> Option<usize> {
        let index = self.sparse.lookup(key)?;
        debug_assert_eq!(self.dense.get(index).map(|node| node.key), Some(key));
        Some(index)
    }

    /// Get the node stored for a key
    pub fn find(&self, key: K) -> Option<&Node<K, V>> {
        self.index_of(key).map(|index| &self.dense[index])
    }

    /// Get a reference to a value
    pub fn get(&self, key: K) -> Option<&V> {
        self.find(key).map(|node| &node.value)
    }

    /// Get a mutable reference to a value
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let index = self.index_of(key)?;
        Some(&mut self.dense[index].value)
    }

    /// Get a reference to a value, failing with `KeyNotFound` if absent
    pub fn at(&self, key: K) -> Result<&V> {
        self.get(key).ok_or(Error::KeyNotFound { key: key.to_u64() })
    }

    /// Get a mutable reference to a value, failing with `KeyNotFound` if absent
    pub fn at_mut(&mut self, key: K) -> Result<&mut V> {
        self.get_mut(key).ok_or(Error::KeyNotFound { key: key.to_u64() })
    }

    /// Insert a value if the key is absent
    ///
    /// Returns `Ok(false)` and keeps the existing value if the key is present.
    /// On failure the map is left unchanged and `value` is dropped.
    pub fn emplace(&mut self, key: K, value: V) -> Result<bool> {
        let loc = Self::locate(key)?;
        if self.sparse.get(loc).is_some() {
            return Ok(false);
        }

        self.append(loc, Node { key, value })?;
        Ok(true)
    }

    /// Insert or overwrite a value, returning the previous one
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        let loc = Self::locate(key)?;
        match self.sparse.get(loc) {
            Some(index) => Ok(Some(core::mem::replace(&mut self.dense[index].value, value))),
            None => {
                self.append(loc, Node { key, value })?;
                Ok(None)
            }
        }
    }

    /// Overwrite the value of a present key
    ///
    /// Does nothing and returns `false` if the key is absent.
    pub fn set(&mut self, key: K, value: V) -> bool {
        match self.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Get a key's value, inserting `f()` first if needed
    pub fn get_or_insert_with(&mut self, key: K, f: impl FnOnce() -> V) -> Result<&mut V> {
        let loc = Self::locate(key)?;
        let index = match self.sparse.get(loc) {
            Some(index) => index,
            None => self.append(loc, Node { key, value: f() })?,
        };
        Ok(&mut self.dense[index].value)
    }

    /// Get a key's value, inserting the default value first if needed
    pub fn get_or_insert(&mut self, key: K) -> Result<&mut V>
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    /// Remove a key, returning its value if it was present
    pub fn erase(&mut self, key: K) -> Option<V> {
        let loc = Self::locate(key).ok()?;
        swap_and_pop(&mut self.dense, &mut self.sparse, loc, |node| node.key).map(|node| node.value)
    }

    /// Keep only the entries for which `f` returns true
    pub fn retain(&mut self, mut f: impl FnMut(K, &mut V) -> bool) {
        let mut index = 0;
        while index < self.dense.len() {
            let node = &mut self.dense[index];
            let key = node.key;
            if f(key, &mut node.value) {
                index += 1;
            } else {
                self.erase(key);
            }
        }
    }

    /// Remove every entry and release the index pages
    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
    }

    /// Make room for `additional` more entries in the dense store
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.dense.try_reserve(additional)
    }

    /// Iterate over entries in dense order
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.dense.iter(),
        }
    }

    /// Iterate over entries with mutable values
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.dense.iter_mut(),
        }
    }

    /// Iterate over keys in dense order
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = K> + ExactSizeIterator + '_ {
        self.dense.iter().map(|node| node.key)
    }

    /// Iterate over values in dense order
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator {
        self.dense.iter().map(|node| &node.value)
    }

    /// Iterate over values mutably
    pub fn values_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator {
        self.dense.iter_mut().map(|node| &mut node.value)
    }

    /// Get the dense nodes directly
    pub fn nodes(&self) -> &[Node<K, V>] {
        self.dense.as_slice()
    }

    /// Copy the map, rebuilding the index table from the copied nodes
    pub fn try_clone(&self) -> Result<Self>
    where
        V: Clone,
    {
        Self::from_dense(self.dense.try_clone()?)
    }

    fn locate(key: K) -> Result<Location> {
        key.locate(PAGE_SIZE).ok_or(Error::KeyOutOfRange { key: key.to_u64() })
    }

    /// Append `node` and map it, rolling the append back if the table cannot grow
    fn append(&mut self, loc: Location, node: Node<K, V>) -> Result<usize> {
        let position = self.dense.len();
        let index = I::from_usize(position).ok_or(Error::IndexOverflow { limit: I::LIMIT })?;

        self.dense.push(node)?;
        if let Err(err) = self.sparse.ensure_page(loc.page) {
            self.dense.pop();
            return Err(err);
        }

        self.sparse.set(loc, index);
        Ok(position)
    }
}

/// Iterator over `(key, &value)` in dense order
pub struct Iter<'a, K, V> {
    pub(crate) inner: slice::Iter<'a, Node<K, V>>,
}

impl<'a, K: Copy, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|node| (node.key, &node.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: Copy, V> DoubleEndedIterator for Iter<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|node| (node.key, &node.value))
    }
}

impl<K: Copy, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over `(key, &mut value)` in dense order
pub struct IterMut<'a, K, V> {
    inner: slice::IterMut<'a, Node<K, V>>,
}

impl<'a, K: Copy, V> Iterator for IterMut<'a, K, V> {
    type Item = (K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|node| (node.key, &mut node.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: Copy, V> DoubleEndedIterator for IterMut<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|node| (node.key, &mut node.value))
    }
}

impl<K: Copy, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<K, V, I, A, const PAGE_SIZE: usize> Default for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> Clone for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: Clone,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|err| err.handle())
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> PartialEq for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: PartialEq,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> Eq for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: Eq,
    I: SparseIndex,
    A: Allocator + Clone,
{
}

impl<K, V, I, A, const PAGE_SIZE: usize> Index<K> for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    type Output = V;

    /// # Panics
    /// If the key is absent
    fn index(&self, key: K) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key {:?} not found in SparseMap", key),
        }
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> fmt::Debug for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    V: fmt::Debug,
    I: SparseIndex,
    A: Allocator + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> Extend<(K, V)> for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    /// Later pairs overwrite earlier ones, like `HashMap::extend`
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            if let Err(err) = self.insert(key, value) {
                err.handle();
            }
        }
    }
}

impl<K, V, I, A, const PAGE_SIZE: usize> FromIterator<(K, V)> for SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, I, A, const PAGE_SIZE: usize> IntoIterator for &'a SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    type Item = (K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, I, A, const PAGE_SIZE: usize> IntoIterator for &'a mut SparseMap<K, V, I, A, PAGE_SIZE>
where
    K: SparseKey,
    I: SparseIndex,
    A: Allocator + Clone,
{
    type Item = (K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use core::marker::PhantomData;

    use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
    use serde::ser::{Serialize, Serializer};

    use super::*;

    impl<K, V, I, A, const PAGE_SIZE: usize> Serialize for SparseMap<K, V, I, A, PAGE_SIZE>
    where
        K: SparseKey + Serialize,
        V: Serialize,
        I: SparseIndex,
        A: Allocator + Clone,
    {
        fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
            serializer.collect_map(self.iter())
        }
    }

    impl<'de, K, V, I, A, const PAGE_SIZE: usize> Deserialize<'de> for SparseMap<K, V, I, A, PAGE_SIZE>
    where
        K: SparseKey + Deserialize<'de>,
        V: Deserialize<'de>,
        I: SparseIndex,
        A: Allocator + Clone + Default,
    {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
            struct MapVisitor<K, V, I, A, const PAGE_SIZE: usize>(PhantomData<(K, V, I, A)>);

            impl<'de, K, V, I, A, const PAGE_SIZE: usize> Visitor<'de> for MapVisitor<K, V, I, A, PAGE_SIZE>
            where
                K: SparseKey + Deserialize<'de>,
                V: Deserialize<'de>,
                I: SparseIndex,
                A: Allocator + Clone + Default,
            {
                type Value = SparseMap<K, V, I, A, PAGE_SIZE>;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a map of integer keys to values")
                }

                fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> core::result::Result<Self::Value, M::Error> {
                    let mut map = SparseMap::new();
                    while let Some((key, value)) = access.next_entry()? {
                        map.insert(key, value).map_err(de::Error::custom)?;
                    }
                    Ok(map)
                }
            }

            deserializer.deserialize_map(MapVisitor::<K, V, I, A, PAGE_SIZE>(PhantomData))
        }
    }
}
