//! Key domain: small non-negative integers split into page coordinates

use core::fmt;
use core::hash::Hash;

/// A key usable by the paged containers
///
/// Keys are non-negative integers. They are only ever consumed through their
/// position, from which the page and in-page offset are derived.
pub trait SparseKey: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Position of this key, or `None` if it does not fit in `usize`
    fn position(self) -> Option<usize>;

    /// Widened value for diagnostics
    fn to_u64(self) -> u64;

    /// Page coordinates of this key for the given page size
    #[inline]
    fn locate(self, page_size: usize) -> Option<Location> {
        self.position().map(|pos| Location::of(pos, page_size))
    }
}

macro_rules! impl_sparse_key {
    ($($ty:ty),* $(,)?) => {$(
        impl SparseKey for $ty {
            #[inline]
            fn position(self) -> Option<usize> {
                usize::try_from(self).ok()
            }

            #[inline]
            fn to_u64(self) -> u64 {
                self as u64
            }
        }
    )*};
}

impl_sparse_key!(u8, u16, u32, u64, usize);

/// Page coordinates of a key: `page = pos / size`, `offset = pos % size`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub page: usize,
    pub offset: usize,
}

impl Location {
    /// Split a position into page coordinates
    #[inline]
    pub const fn of(position: usize, page_size: usize) -> Self {
        Self {
            page: position / page_size,
            offset: position % page_size,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.offset)
    }
}
