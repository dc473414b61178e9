//! Pool allocator - fixed-size block allocation

use core::ptr::NonNull;
use std::alloc::{self, Layout};

use parking_lot::Mutex;
use tessera_core::{Error, Result};

use crate::{align_up, Allocator};

/// Pool allocator for fixed-size blocks
///
/// Extremely fast for allocating objects of the same size, which makes it a
/// natural home for index pages. The pool never grows: once every block is
/// handed out, allocation reports exhaustion.
pub struct Pool {
    /// Backing memory
    buffer: NonNull<u8>,
    /// Layout of the backing memory
    layout: Layout,
    /// Block size (including alignment padding)
    block_size: usize,
    /// Alignment every block satisfies
    block_align: usize,
    /// Number of blocks
    block_count: usize,
    /// Intrusive free list
    free: Mutex<FreeList>,
}

#[repr(C)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct FreeList {
    head: Option<NonNull<FreeNode>>,
    allocated: usize,
}

// Safety: the free list is only touched under the mutex, blocks are handed
// out to a single owner at a time
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Create a new pool for objects of the given size
    pub fn new(object_size: usize, object_align: usize, count: usize) -> Result<Self> {
        // Block size must be at least as large as FreeNode
        let block_align = object_align.max(core::mem::align_of::<FreeNode>());
        if !block_align.is_power_of_two() {
            return Err(Error::CapacityOverflow);
        }
        let min_size = core::mem::size_of::<FreeNode>();
        let block_size = align_up(object_size.max(min_size), block_align);

        let total_size = block_size.checked_mul(count).ok_or(Error::CapacityOverflow)?;
        let layout = Layout::from_size_align(total_size, block_align)?;

        let buffer = if total_size == 0 {
            NonNull::new(block_align as *mut u8).ok_or(Error::CapacityOverflow)?
        } else {
            NonNull::new(unsafe { alloc::alloc(layout) }).ok_or_else(|| Error::allocation(layout))?
        };

        let mut pool = Self {
            buffer,
            layout,
            block_size,
            block_align,
            block_count: count,
            free: Mutex::new(FreeList {
                head: None,
                allocated: 0,
            }),
        };

        // Initialize free list
        let head = pool.build_free_list();
        pool.free.get_mut().head = head;

        Ok(pool)
    }

    /// Create a pool for a specific type
    pub fn for_type<T>(count: usize) -> Result<Self> {
        Self::new(
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
            count,
        )
    }

    fn build_free_list(&self) -> Option<NonNull<FreeNode>> {
        let base = self.buffer.as_ptr();

        let mut prev: Option<NonNull<FreeNode>> = None;

        // Build free list from end to start (so allocation returns from start)
        for i in (0..self.block_count).rev() {
            let block = unsafe { base.add(i * self.block_size) } as *mut FreeNode;
            unsafe {
                block.write(FreeNode { next: prev });
            }
            prev = NonNull::new(block);
        }

        prev
    }

    /// Allocate a block
    pub fn alloc_block(&self) -> Option<NonNull<u8>> {
        let mut free = self.free.lock();
        let head = free.head?;

        free.head = unsafe { head.as_ref().next };
        free.allocated += 1;
        Some(head.cast())
    }

    /// Free a block
    ///
    /// # Safety
    /// The pointer must have been allocated by this pool
    pub unsafe fn free_block(&self, ptr: NonNull<u8>) {
        debug_assert!(self.owns(ptr.as_ptr()), "block does not belong to this pool");

        let node = ptr.cast::<FreeNode>();
        let mut free = self.free.lock();
        node.as_ptr().write(FreeNode { next: free.head });
        free.head = Some(node);
        free.allocated -= 1;
    }

    /// Check if a pointer lies on a block boundary inside this pool
    pub fn owns(&self, ptr: *const u8) -> bool {
        let base = self.buffer.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base
            && addr < base + self.block_size * self.block_count
            && (addr - base) % self.block_size == 0
    }

    /// Return every block to the pool
    ///
    /// Requires exclusive access, so no block can still be in use.
    pub fn reset(&mut self) {
        let head = self.build_free_list();
        *self.free.get_mut() = FreeList { head, allocated: 0 };
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Get the total number of blocks
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Get the number of allocated blocks
    pub fn allocated_count(&self) -> usize {
        self.free.lock().allocated
    }

    /// Get the number of free blocks
    pub fn free_count(&self) -> usize {
        self.block_count - self.allocated_count()
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        let allocated = self.allocated_count();
        PoolStats {
            block_size: self.block_size,
            total_blocks: self.block_count,
            allocated_blocks: allocated,
            free_blocks: self.block_count - allocated,
        }
    }
}

impl Allocator for Pool {
    fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        // Check that the requested allocation fits in a block
        if align > self.block_align || align_up(size, align) > self.block_size {
            log::trace!(
                "Pool rejected {} byte request (block size {})",
                size,
                self.block_size
            );
            return None;
        }

        self.alloc_block()
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _align: usize) {
        self.free_block(ptr);
    }

    fn capacity(&self) -> usize {
        self.block_count * self.block_size
    }

    fn used(&self) -> usize {
        self.allocated_count() * self.block_size
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let allocated = self.free.get_mut().allocated;
        if allocated != 0 {
            log::warn!("Pool dropped with {} blocks still allocated", allocated);
        }
        if self.layout.size() != 0 {
            unsafe { alloc::dealloc(self.buffer.as_ptr(), self.layout) };
        }
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("block_size", &self.block_size)
            .field("block_align", &self.block_align)
            .field("block_count", &self.block_count)
            .field("allocated", &self.allocated_count())
            .finish()
    }
}

/// Pool statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
}
