//! # tessera_structures - Paged Sparse/Dense Containers
//!
//! Containers mapping small integer keys to O(1) slots while keeping live
//! elements packed for cache-friendly iteration:
//! - SparseSet: key-only set
//! - SparseMap: key/value map with key-carrying nodes
//! - DenseMap: thread-safe map, dense store and index table locked separately
//! - SharedSparseMap: SparseMap behind a single reader-writer lock
//!
//! Every container is built from the same two parts: a [`PagedIndex`] that
//! maps `key / PAGE_SIZE` and `key % PAGE_SIZE` to a dense position, and a
//! [`DenseStore`] holding the elements themselves. Removal is swap-and-pop,
//! so iteration order is insertion order perturbed by erasures.

pub mod dense;
pub mod dense_map;
pub mod shared_sparse_map;
pub mod sparse;
pub mod sparse_map;
pub mod sparse_set;

pub use dense::DenseStore;
pub use dense_map::{DenseMap, DenseMapRef};
pub use shared_sparse_map::SharedSparseMap;
pub use sparse::{swap_and_pop, PagedIndex, DEFAULT_PAGE_SIZE};
pub use sparse_map::{Node, SparseMap};
pub use sparse_set::SparseSet;

pub use tessera_core::{Error, Location, Result, SparseIndex, SparseKey};
pub use tessera_memory::{Allocator, Heap};

pub mod prelude {
    pub use crate::dense_map::DenseMap;
    pub use crate::shared_sparse_map::SharedSparseMap;
    pub use crate::sparse_map::SparseMap;
    pub use crate::sparse_set::SparseSet;
    pub use tessera_core::prelude::*;
}
