//! Coarse block pool
//!
//! # Safety
//!
//! The pool owns one contiguous, page-aligned cache region carved into
//! `block_size` blocks, plus any number of blocks it hands out straight from
//! the system allocator once the cache is drained:
//! - A spin lock guards the free deque; system calls run outside it
//! - Cache membership is a range test on `[start, end)`, no per-block records
//! - Freed cache blocks go to the front of the deque and are reused first
//!
//! ## Invariants
//!
//! - Every deque entry lies in `[start, end)` and sits on a block boundary
//! - The region is allocated once by `init` and released in `Drop`
//! - Blocks outside the region were allocated with `block_layout()`

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc;
use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use super::BlockPoolStats;
use crate::allocator::{BlockSource, PAGE_SIZE};
use crate::error::{MemoryError, MemoryResult};
use crate::utils::is_aligned;

/// Cache region handed out by `init`
struct Region {
    start: NonNull<u8>,
    layout: Layout,
}

impl Region {
    fn start_addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    fn end_addr(&self) -> usize {
        self.start_addr() + self.layout.size()
    }
}

/// State guarded by the spin lock
#[derive(Default)]
struct BlockCache {
    initialized: bool,
    region: Option<Region>,
    free: VecDeque<NonNull<u8>>,
}

impl BlockCache {
    fn contains(&self, addr: usize) -> bool {
        self.region
            .as_ref()
            .is_some_and(|r| addr >= r.start_addr() && addr < r.end_addr())
    }
}

/// Fixed-size pool of page-aligned blocks (`block_size` ≥ 4096)
///
/// A cache of `cache_count` blocks is allocated up front by [`init`]; once
/// it is drained, [`alloc`] falls back to the system allocator and [`free`]
/// returns such blocks straight to it.
///
/// # Example
/// ```
/// use strata_memory::allocator::BlockPool;
///
/// let pool = BlockPool::with_cache(4096, 4)?;
/// let block = pool.alloc()?;
/// assert!(pool.contains(block.as_ptr()));
/// assert_eq!(pool.free_count(), 3);
///
/// // SAFETY: `block` came from this pool and is not used afterwards.
/// unsafe { pool.free(block)? };
/// assert_eq!(pool.free_count(), 4);
/// # Ok::<(), strata_memory::MemoryError>(())
/// ```
///
/// [`init`]: BlockPool::init
/// [`alloc`]: BlockPool::alloc
/// [`free`]: BlockPool::free
pub struct BlockPool {
    block_size: usize,
    cache: SpinMutex<BlockCache>,

    cache_blocks: AtomicUsize,
    cache_hits: AtomicUsize,
    fallback_allocs: AtomicUsize,
    fallback_frees: AtomicUsize,
}

impl BlockPool {
    /// Creates an uninitialized pool; call [`BlockPool::init`] before use
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            cache: SpinMutex::new(BlockCache::default()),
            cache_blocks: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            fallback_allocs: AtomicUsize::new(0),
            fallback_frees: AtomicUsize::new(0),
        }
    }

    /// Creates a pool and initializes its cache in one step
    pub fn with_cache(block_size: usize, cache_count: usize) -> MemoryResult<Self> {
        let pool = Self::new(block_size);
        pool.init(cache_count)?;
        Ok(pool)
    }

    /// Allocates the cache region of `cache_count` blocks
    ///
    /// One-shot. Fails without side effects if the block size is not a
    /// positive multiple of [`PAGE_SIZE`], if the pool is already
    /// initialized, or if the region cannot be allocated.
    pub fn init(&self, cache_count: usize) -> MemoryResult<()> {
        if self.block_size < PAGE_SIZE || !is_aligned(self.block_size, PAGE_SIZE) {
            return Err(MemoryError::invalid_config(format!(
                "block size {} is not a positive multiple of {PAGE_SIZE}",
                self.block_size
            )));
        }
        if self.cache.lock().initialized {
            return Err(MemoryError::already_initialized("block pool"));
        }

        // The region is allocated outside the lock; a racing init loses below.
        let region = if cache_count == 0 {
            None
        } else {
            let size = self
                .block_size
                .checked_mul(cache_count)
                .ok_or_else(|| MemoryError::size_overflow("block cache size"))?;
            let layout = Layout::from_size_align(size, PAGE_SIZE)
                .map_err(|_| MemoryError::invalid_layout("block cache exceeds isize::MAX"))?;
            // SAFETY: `layout` has non-zero size (cache_count > 0, block_size >= PAGE_SIZE).
            let start = NonNull::new(unsafe { alloc::alloc(layout) })
                .ok_or_else(|| MemoryError::allocation_failed_with_layout(layout))?;
            Some(Region { start, layout })
        };

        let mut cache = self.cache.lock();
        if cache.initialized {
            drop(cache);
            if let Some(region) = region {
                // SAFETY: the region was allocated above with this layout and never shared.
                unsafe { alloc::dealloc(region.start.as_ptr(), region.layout) };
            }
            return Err(MemoryError::already_initialized("block pool"));
        }

        if let Some(region) = &region {
            cache.free.reserve_exact(cache_count);
            for i in 0..cache_count {
                // SAFETY: i * block_size < region size, so the offset stays in bounds.
                let block = unsafe { region.start.add(i * self.block_size) };
                cache.free.push_back(block);
            }
        }
        cache.region = region;
        cache.initialized = true;
        drop(cache);

        self.cache_blocks.store(cache_count, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        debug!(
            block_size = self.block_size,
            cache_count, "block pool initialized"
        );

        Ok(())
    }

    /// Hands out one block
    ///
    /// Pops the most recently freed cache block; when the cache is drained,
    /// performs a fresh page-aligned system allocation outside the lock.
    pub fn alloc(&self) -> MemoryResult<NonNull<u8>> {
        {
            let mut cache = self.cache.lock();
            if !cache.initialized {
                return Err(MemoryError::not_initialized("block pool"));
            }
            if let Some(block) = cache.free.pop_front() {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(block);
            }
        }

        let layout = self.block_layout()?;
        // SAFETY: block_size was validated by init, so `layout` is non-zero.
        let block = NonNull::new(unsafe { alloc::alloc(layout) })
            .ok_or_else(|| MemoryError::allocation_failed_with_layout(layout))?;
        self.fallback_allocs.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        trace!(block_size = self.block_size, "block cache drained, allocated from system");

        Ok(block)
    }

    /// Returns a block to the pool
    ///
    /// Cache blocks are pushed to the front of the free deque; any other
    /// block is released to the system outside the lock. A pointer inside
    /// the cache but off a block boundary fails with
    /// [`MemoryError::ForeignPointer`] and leaves the deque untouched.
    ///
    /// # Safety
    ///
    /// `block` must come from [`BlockPool::alloc`] on this pool, must not
    /// have been freed since, and must not be used after this call.
    pub unsafe fn free(&self, block: NonNull<u8>) -> MemoryResult<()> {
        let addr = block.as_ptr() as usize;
        {
            let mut cache = self.cache.lock();
            if let Some(region) = &cache.region
                && addr >= region.start_addr()
                && addr < region.end_addr()
            {
                if (addr - region.start_addr()) % self.block_size != 0 {
                    return Err(MemoryError::foreign_pointer(addr));
                }
                cache.free.push_front(block);
                return Ok(());
            }
        }

        let layout = self.block_layout()?;
        // SAFETY: non-cache blocks come from `alloc`'s fallback path with this layout.
        unsafe { alloc::dealloc(block.as_ptr(), layout) };
        self.fallback_frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Configured block size in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the cache region
    pub fn cache_count(&self) -> usize {
        self.cache_blocks.load(Ordering::Relaxed)
    }

    /// Number of cache blocks currently in the free deque
    pub fn free_count(&self) -> usize {
        self.cache.lock().free.len()
    }

    /// Whether `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.cache.lock().initialized
    }

    /// Whether `ptr` lies inside the cache region
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.cache.lock().contains(ptr as usize)
    }

    /// Snapshot of the pool's counters
    pub fn stats(&self) -> BlockPoolStats {
        BlockPoolStats {
            block_size: self.block_size,
            cache_blocks: self.cache_count(),
            free_blocks: self.free_count(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_allocs: self.fallback_allocs.load(Ordering::Relaxed),
            fallback_frees: self.fallback_frees.load(Ordering::Relaxed),
        }
    }

    fn block_layout(&self) -> MemoryResult<Layout> {
        Layout::from_size_align(self.block_size, PAGE_SIZE)
            .map_err(|_| MemoryError::invalid_layout("block size exceeds isize::MAX"))
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        if let Some(region) = self.cache.get_mut().region.take() {
            // SAFETY: the region was allocated in `init` with `region.layout`.
            unsafe { alloc::dealloc(region.start.as_ptr(), region.layout) };
        }
    }
}

impl core::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("cache_count", &self.cache_count())
            .field("free_count", &self.free_count())
            .finish()
    }
}

// SAFETY: BlockPool implements BlockSource faithfully.
// - Every block is block_size bytes and PAGE_SIZE aligned (region and fallback layouts)
// - A block sits in the free deque or with exactly one caller, never both
unsafe impl BlockSource for BlockPool {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn alloc_block(&self) -> MemoryResult<NonNull<u8>> {
        self.alloc()
    }

    unsafe fn free_block(&self, block: NonNull<u8>) -> MemoryResult<()> {
        // SAFETY: forwarded caller contract.
        unsafe { self.free(block) }
    }
}

// SAFETY: BlockPool is Send because:
// - The region and every deque pointer are owned by the pool, not tied to a thread
// - All other fields are atomics or plain integers
unsafe impl Send for BlockPool {}

// SAFETY: BlockPool is Sync because:
// - The deque and region are only touched under the spin lock
// - Counters are atomics
unsafe impl Sync for BlockPool {}
