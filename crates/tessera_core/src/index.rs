//! Index domain: unsigned dense positions stored in index pages

use core::fmt;

/// An unsigned integer stored in index pages
///
/// `VACANT` (the type's maximum) marks a slot without a mapping, so every
/// other value, `0` included, is a valid dense position.
pub trait SparseIndex: Copy + Eq + Ord + fmt::Debug + Send + Sync + 'static {
    /// Reserved slot value meaning "no mapping"
    const VACANT: Self;

    /// Number of dense positions this type can address
    const LIMIT: usize;

    /// Convert a dense position, `None` if it collides with `VACANT` or overflows
    fn from_usize(index: usize) -> Option<Self>;

    /// Dense position held by this value
    fn to_usize(self) -> usize;

    /// Check if this is the vacant sentinel
    #[inline]
    fn is_vacant(self) -> bool {
        self == Self::VACANT
    }
}

macro_rules! impl_sparse_index {
    ($($ty:ty),* $(,)?) => {$(
        impl SparseIndex for $ty {
            const VACANT: Self = <$ty>::MAX;

            const LIMIT: usize = if (<$ty>::MAX as u128) < (usize::MAX as u128) {
                <$ty>::MAX as usize
            } else {
                usize::MAX
            };

            #[inline]
            fn from_usize(index: usize) -> Option<Self> {
                <$ty>::try_from(index).ok().filter(|i| *i != Self::VACANT)
            }

            #[inline]
            fn to_usize(self) -> usize {
                debug_assert!(!self.is_vacant());
                self as usize
            }
        }
    )*};
}

impl_sparse_index!(u8, u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_a_valid_index() {
        assert_eq!(u32::from_usize(0), Some(0));
        assert!(!0u32.is_vacant());
    }

    #[test]
    fn test_vacant_is_reserved() {
        assert!(u8::VACANT.is_vacant());
        assert_eq!(u8::from_usize(255), None);
        assert_eq!(u8::from_usize(254), Some(254));
        assert_eq!(u8::from_usize(1000), None);
        assert_eq!(<u8 as SparseIndex>::LIMIT, 255);
    }
}
