//! Error types shared by every container

use std::alloc::Layout;

use thiserror::Error;

/// The core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The allocator could not provide a block of the requested layout
    #[error("Allocation of {size} bytes (align {align}) failed")]
    AllocationFailure { size: usize, align: usize },

    /// A requested capacity does not fit in a memory layout
    #[error("Capacity overflow")]
    CapacityOverflow,

    /// The dense store would grow past what the index type can address
    #[error("Dense index overflow: index type addresses at most {limit} elements")]
    IndexOverflow { limit: usize },

    /// Lookup of a key that is not present
    #[error("Key not found: {key}")]
    KeyNotFound { key: u64 },

    /// A key whose value cannot be used as a position
    #[error("Key out of range: {key}")]
    KeyOutOfRange { key: u64 },
}

/// Result type alias
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Allocation failure for the given layout
    #[inline]
    pub fn allocation(layout: Layout) -> Self {
        Error::AllocationFailure {
            size: layout.size(),
            align: layout.align(),
        }
    }

    /// Escalate an error inside an infallible API (`Clone`, `Extend`, ...).
    ///
    /// Allocation failures go through `handle_alloc_error` like the standard
    /// collections do; everything else panics with the error message.
    #[cold]
    pub fn handle(self) -> ! {
        if let Error::AllocationFailure { size, align } = self {
            if let Ok(layout) = Layout::from_size_align(size, align) {
                std::alloc::handle_alloc_error(layout);
            }
        }
        panic!("{}", self)
    }
}

impl From<std::alloc::LayoutError> for Error {
    fn from(_: std::alloc::LayoutError) -> Self {
        Error::CapacityOverflow
    }
}
