//! Allocator trait seams
//!
//! [`BlockSource`] is the contract between the coarse block pool and the slab
//! allocator that carves its blocks. Tests plug in failing sources through it.

use core::ptr::NonNull;

use crate::error::MemoryResult;

/// Provider of fixed-size, page-aligned blocks
///
/// # Safety
///
/// Implementors must hand out blocks that are exactly [`block_size`] bytes,
/// aligned to [`PAGE_SIZE`], exclusively owned by the caller until returned
/// through [`free_block`], and never overlapping another outstanding block.
///
/// [`block_size`]: BlockSource::block_size
/// [`free_block`]: BlockSource::free_block
/// [`PAGE_SIZE`]: crate::allocator::PAGE_SIZE
pub unsafe trait BlockSource: Sync {
    /// Size in bytes of every block this source returns
    fn block_size(&self) -> usize;

    /// Hands out one block
    ///
    /// Returns [`MemoryError::AllocationFailed`] when neither the cache nor
    /// the system can provide memory.
    ///
    /// [`MemoryError::AllocationFailed`]: crate::error::MemoryError::AllocationFailed
    fn alloc_block(&self) -> MemoryResult<NonNull<u8>>;

    /// Returns a block obtained from [`alloc_block`](BlockSource::alloc_block)
    ///
    /// Fails with [`MemoryError::ForeignPointer`] when the source can tell
    /// that `block` is not one of its blocks; the source is then unchanged.
    ///
    /// [`MemoryError::ForeignPointer`]: crate::error::MemoryError::ForeignPointer
    ///
    /// # Safety
    ///
    /// `block` must come from `alloc_block` on this same source and must not
    /// be used after this call.
    unsafe fn free_block(&self, block: NonNull<u8>) -> MemoryResult<()>;
}
