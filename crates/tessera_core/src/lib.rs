//! # tessera_core - Tessera Core
//!
//! Shared primitives for the Tessera container family:
//! - **Errors**: the allocation / lookup failure taxonomy every container reports
//! - **Keys**: the small non-negative integer domain containers are indexed by
//! - **Indices**: the unsigned dense-index domain stored in index pages
//!
//! Nothing in here allocates. Allocation lives in `tessera_memory`, the
//! containers themselves in `tessera_structures`.

pub mod error;
pub mod index;
pub mod key;

pub use error::*;
pub use index::*;
pub use key::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::index::SparseIndex;
    pub use crate::key::{Location, SparseKey};
}
