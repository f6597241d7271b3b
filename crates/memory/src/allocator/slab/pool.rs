//! Fixed-size element pool built on a block source
//!
//! # Safety
//!
//! Elements come from three places, tried in order:
//! - The resident slab, allocated directly by `init` and never retired
//! - The head of the partial list (carved slabs with spare capacity)
//! - A freshly carved block from the [`BlockSource`]
//!
//! Carved slabs are indexed by their end address so `free` can recover the
//! owning slab from a bare element pointer.
//!
//! ## Invariants
//!
//! - A carved slab is on exactly one of `partial` or `full`, and in `index`
//! - A slab on `full` has no spare capacity, one on `partial` had some when linked
//! - Every carved slab spans exactly `blocks.block_size()` bytes
//! - The state mutex is never held across a call into the block source

use core::alloc::Layout;
use core::ops::Bound::{Excluded, Unbounded};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc;
use std::collections::BTreeSet;

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

use super::{FreeOutcome, PoolConfig, PoolStats, SLAB_HEADER_SIZE, Slab};
use crate::allocator::{BlockPool, BlockSource};
use crate::error::{MemoryError, MemoryResult};
use crate::list::List;
use crate::utils::atomic_max;

/// Alignment of the resident slab allocation
const RESIDENT_ALIGN: usize = 64;

/// Slab allocated directly at `init`, outside the block source
struct ResidentSlab {
    slab: Mutex<Slab>,
    region: NonNull<u8>,
    layout: Layout,
}

impl ResidentSlab {
    fn contains(&self, addr: usize) -> bool {
        let start = self.region.as_ptr() as usize;
        addr >= start && addr < start + self.layout.size()
    }
}

/// Carved-slab bookkeeping guarded by the pool mutex
struct SlabLists {
    partial: List,
    full: List,
    /// End addresses of carved slabs
    index: BTreeSet<usize>,
}

/// Pool of fixed-size elements
///
/// Borrows its block source, which must outlive the pool. Every element is
/// `element_size()` bytes and pointer-aligned.
///
/// # Example
/// ```
/// use strata_memory::allocator::{BlockPool, MemoryPool};
///
/// let blocks = BlockPool::with_cache(4096, 4)?;
/// let pool = MemoryPool::with_cache(&blocks, 64, 10)?;
///
/// let element = pool.alloc()?;
/// // SAFETY: `element` came from this pool and is not used afterwards.
/// unsafe { pool.free(element)? };
/// # Ok::<(), strata_memory::MemoryError>(())
/// ```
pub struct MemoryPool<'a, B: BlockSource + ?Sized = BlockPool> {
    blocks: &'a B,
    element_size: usize,
    config: PoolConfig,
    initialized: bool,

    resident: Option<ResidentSlab>,
    state: Mutex<SlabLists>,

    carved_bytes: AtomicUsize,
    live_elements: AtomicUsize,

    total_allocs: AtomicUsize,
    total_frees: AtomicUsize,
    peak_usage: AtomicUsize,
}

impl<'a, B: BlockSource + ?Sized> MemoryPool<'a, B> {
    /// Creates an uninitialized pool with the default configuration
    ///
    /// `element_size` is rounded up to the pointer width.
    pub fn new(blocks: &'a B, element_size: usize) -> Self {
        Self::with_config(blocks, element_size, PoolConfig::default())
    }

    /// Creates an uninitialized pool with a custom configuration
    pub fn with_config(blocks: &'a B, element_size: usize, config: PoolConfig) -> Self {
        let element_size = element_size
            .checked_next_multiple_of(size_of::<usize>())
            .unwrap_or(usize::MAX);
        Self {
            blocks,
            element_size,
            config,
            initialized: false,
            resident: None,
            state: Mutex::new(SlabLists {
                partial: List::new(),
                full: List::new(),
                index: BTreeSet::new(),
            }),
            carved_bytes: AtomicUsize::new(0),
            live_elements: AtomicUsize::new(0),
            total_allocs: AtomicUsize::new(0),
            total_frees: AtomicUsize::new(0),
            peak_usage: AtomicUsize::new(0),
        }
    }

    /// Creates a pool and initializes its resident slab in one step
    pub fn with_cache(
        blocks: &'a B,
        element_size: usize,
        cache_count: usize,
    ) -> MemoryResult<Self> {
        let mut pool = Self::new(blocks, element_size);
        pool.init(cache_count)?;
        Ok(pool)
    }

    /// Allocates the resident slab holding exactly `cache_count` elements
    ///
    /// One-shot. Fails without side effects if the element size is zero or
    /// cannot fit in one block next to a slab header, if the pool is already
    /// initialized, or if the resident slab cannot be allocated.
    pub fn init(&mut self, cache_count: usize) -> MemoryResult<()> {
        if self.initialized {
            return Err(MemoryError::already_initialized("slab pool"));
        }
        if self.element_size == 0 {
            return Err(MemoryError::invalid_config("element size must be non-zero"));
        }
        let block_size = self.blocks.block_size();
        let room = block_size.saturating_sub(SLAB_HEADER_SIZE);
        if self.element_size > room {
            return Err(MemoryError::invalid_config(format!(
                "element size {} exceeds the {room} usable bytes of a {block_size}-byte block",
                self.element_size
            )));
        }

        if cache_count > 0 {
            let size = cache_count
                .checked_mul(self.element_size)
                .and_then(|n| n.checked_add(SLAB_HEADER_SIZE))
                .ok_or_else(|| MemoryError::size_overflow("resident slab size"))?;
            let layout = Layout::from_size_align(size, RESIDENT_ALIGN)
                .map_err(|_| MemoryError::invalid_layout("resident slab exceeds isize::MAX"))?;
            // SAFETY: `layout` is at least SLAB_HEADER_SIZE bytes.
            let region = NonNull::new(unsafe { alloc::alloc(layout) })
                .ok_or_else(|| MemoryError::allocation_failed_with_layout(layout))?;
            // SAFETY: `region` is a fresh, exclusively owned allocation of `size` bytes.
            let Some(slab) = (unsafe { Slab::init(region, size, self.element_size) }) else {
                // SAFETY: allocated above with `layout` and never shared.
                unsafe { alloc::dealloc(region.as_ptr(), layout) };
                return Err(MemoryError::invalid_config("resident slab cannot hold an element"));
            };
            debug_assert_eq!(slab.max_count(), cache_count);
            self.resident = Some(ResidentSlab {
                slab: Mutex::new(slab),
                region,
                layout,
            });
        }
        self.initialized = true;

        #[cfg(feature = "logging")]
        debug!(
            element_size = self.element_size,
            cache_count, block_size, "slab pool initialized"
        );

        Ok(())
    }

    /// Hands out one element
    ///
    /// Fails with [`MemoryError::AllocationFailed`] (or whatever the block
    /// source reports) when every slab is full and no block can be carved.
    pub fn alloc(&self) -> MemoryResult<NonNull<u8>> {
        if !self.initialized {
            return Err(MemoryError::not_initialized("slab pool"));
        }

        if let Some(resident) = &self.resident {
            let element = resident.slab.lock().alloc();
            if let Some(element) = element {
                return Ok(self.on_alloc(element));
            }
        }

        if let Some(element) = self.alloc_from_partial() {
            return Ok(self.on_alloc(element));
        }

        let element = self.carve()?;
        Ok(self.on_alloc(element))
    }

    /// Returns an element to its slab
    ///
    /// A carved slab whose last element comes back is unlinked and its block
    /// returned to the source. Pointers the pool cannot attribute to one of
    /// its slots fail with [`MemoryError::ForeignPointer`]; a release into a
    /// slab with no live elements fails with [`MemoryError::DoubleFree`].
    /// Either way the pool is left untouched.
    ///
    /// # Safety
    ///
    /// If `element` was handed out by this pool, it must not have been freed
    /// since and must not be used after this call.
    pub unsafe fn free(&self, element: NonNull<u8>) -> MemoryResult<()> {
        let addr = element.as_ptr() as usize;

        if let Some(resident) = &self.resident
            && resident.contains(addr)
        {
            let mut slab = resident.slab.lock();
            slab.free(element)?;
            self.scrub(element);
            drop(slab);
            self.on_free();
            return Ok(());
        }

        let block_size = self.blocks.block_size();
        let mut lists = self.state.lock();

        let end = lists
            .index
            .range((Excluded(addr), Unbounded))
            .next()
            .copied()
            .ok_or_else(|| MemoryError::foreign_pointer(addr))?;
        let offset = addr
            .checked_sub(end - block_size)
            .ok_or_else(|| MemoryError::foreign_pointer(addr))?;
        let base = NonNull::new(element.as_ptr().wrapping_sub(offset))
            .ok_or_else(|| MemoryError::foreign_pointer(addr))?;

        // SAFETY: `end` is indexed, so a live header sits block_size bytes below it.
        let mut slab = unsafe { Slab::from_base(base) };
        let outcome = slab.free(element)?;
        self.on_free();

        match outcome {
            FreeOutcome::Emptied => {
                // SAFETY: carved slabs are linked on exactly one list while indexed.
                unsafe { List::unlink(slab.node()) };
                lists.index.remove(&end);
                drop(lists);

                self.carved_bytes.fetch_sub(block_size, Ordering::Relaxed);
                // SAFETY: the slab is unlinked and unindexed, so nothing references
                // the block any more; it came from `alloc_block` on this source.
                unsafe { self.blocks.free_block(slab.base())? };

                #[cfg(feature = "logging")]
                trace!(slab_end = end, "retired empty slab");
            }
            FreeOutcome::Reopened => {
                self.scrub(element);
                // SAFETY: the slab was full, hence linked on `full`.
                unsafe {
                    List::unlink(slab.node());
                    lists.partial.push_back(slab.node());
                }
            }
            FreeOutcome::Unchanged => self.scrub(element),
        }

        Ok(())
    }

    /// Element size in bytes after rounding to the pointer width
    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bytes held in slabs: the resident slab plus every carved block
    pub fn allocated_block_bytes(&self) -> usize {
        let resident = self.resident.as_ref().map_or(0, |r| r.layout.size());
        resident + self.carved_bytes.load(Ordering::Relaxed)
    }

    /// Bytes of live elements
    pub fn allocated_bytes(&self) -> usize {
        self.live_elements.load(Ordering::Relaxed) * self.element_size
    }

    /// Number of carved slabs currently held
    pub fn slab_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether `ptr` lies inside the resident slab
    pub fn contains_resident(&self, ptr: *const u8) -> bool {
        self.resident
            .as_ref()
            .is_some_and(|r| r.contains(ptr as usize))
    }

    /// Snapshot of the pool's counters, if `track_stats` is enabled
    pub fn stats(&self) -> Option<PoolStats> {
        if !self.config.track_stats {
            return None;
        }
        let (partial_slabs, full_slabs) = {
            let lists = self.state.lock();
            (lists.partial.len(), lists.full.len())
        };
        Some(PoolStats {
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            total_deallocs: self.total_frees.load(Ordering::Relaxed),
            peak_usage: self.peak_usage.load(Ordering::Relaxed),
            current_usage: self.allocated_bytes(),
            slab_bytes: self.allocated_block_bytes(),
            element_size: self.element_size,
            partial_slabs,
            full_slabs,
        })
    }

    fn alloc_from_partial(&self) -> Option<NonNull<u8>> {
        let mut lists = self.state.lock();
        let node = lists.partial.front()?;
        // SAFETY: nodes on `partial` belong to live carved slab headers.
        let mut slab = unsafe { Slab::from_node(node) };

        match slab.alloc() {
            Some(element) => {
                if slab.is_full() {
                    // SAFETY: `node` is linked on `partial`; lists are locked.
                    unsafe {
                        List::unlink(node);
                        lists.full.push_back(node);
                    }
                }
                Some(element)
            }
            None => {
                // Listed as having room but exhausted; park it and carve.
                // SAFETY: as above.
                unsafe {
                    List::unlink(node);
                    lists.full.push_back(node);
                }
                None
            }
        }
    }

    /// Turns a fresh block into a slab and takes its first element
    fn carve(&self) -> MemoryResult<NonNull<u8>> {
        let block = self.blocks.alloc_block()?;
        let block_size = self.blocks.block_size();

        // SAFETY: the block is exclusively ours, block_size bytes and page aligned.
        let first = unsafe { Slab::init(block, block_size, self.element_size) }
            .and_then(|mut slab| slab.alloc().map(|element| (slab, element)));
        let Some((slab, element)) = first else {
            // SAFETY: the block came from this source and was never published.
            unsafe { self.blocks.free_block(block)? };
            return Err(MemoryError::invalid_config(format!(
                "block of {block_size} bytes cannot hold a {}-byte element",
                self.element_size
            )));
        };

        let mut lists = self.state.lock();
        lists.index.insert(slab.end_addr());
        // SAFETY: the header is fresh, unlinked and lives until the block is freed.
        unsafe {
            if slab.is_full() {
                lists.full.push_front(slab.node());
            } else {
                lists.partial.push_front(slab.node());
            }
        }
        drop(lists);

        self.carved_bytes.fetch_add(block_size, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        trace!(
            slab_end = slab.end_addr(),
            capacity = slab.max_count(),
            "carved new slab"
        );

        Ok(element)
    }

    fn on_alloc(&self, element: NonNull<u8>) -> NonNull<u8> {
        let live = self.live_elements.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.track_stats {
            self.total_allocs.fetch_add(1, Ordering::Relaxed);
            atomic_max(&self.peak_usage, live * self.element_size);
        }
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the element is element_size bytes and now owned by the caller.
            unsafe { ptr::write_bytes(element.as_ptr(), pattern, self.element_size) };
        }
        element
    }

    fn on_free(&self) {
        self.live_elements.fetch_sub(1, Ordering::Relaxed);
        if self.config.track_stats {
            self.total_frees.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fills a freed slot past its free-list link word
    ///
    /// Must run while the slot's slab is still locked.
    fn scrub(&self, element: NonNull<u8>) {
        let word = size_of::<usize>();
        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the slot is element_size >= word bytes and vacant.
            unsafe {
                ptr::write_bytes(element.as_ptr().add(word), pattern, self.element_size - word);
            }
        }
    }
}

impl<B: BlockSource + ?Sized> Drop for MemoryPool<'_, B> {
    fn drop(&mut self) {
        #[cfg(feature = "logging")]
        {
            let live = *self.live_elements.get_mut();
            if live > 0 {
                warn!(
                    live,
                    element_size = self.element_size,
                    "slab pool dropped with live elements"
                );
            }
        }

        let lists = self.state.get_mut();
        let nodes: Vec<_> = lists.partial.iter().chain(lists.full.iter()).collect();
        for node in nodes {
            // SAFETY: every listed node heads a carved block still owned by the pool.
            let released = unsafe {
                List::unlink(node);
                self.blocks.free_block(Slab::from_node(node).base())
            };
            if let Err(_err) = released {
                #[cfg(feature = "logging")]
                warn!(error = %_err, "block source rejected a slab on teardown");
            }
        }
        lists.index.clear();

        if let Some(resident) = self.resident.take() {
            // SAFETY: allocated in `init` with `resident.layout`.
            unsafe { alloc::dealloc(resident.region.as_ptr(), resident.layout) };
        }
    }
}

impl<B: BlockSource + ?Sized> core::fmt::Debug for MemoryPool<'_, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("element_size", &self.element_size)
            .field("initialized", &self.initialized)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("allocated_block_bytes", &self.allocated_block_bytes())
            .finish_non_exhaustive()
    }
}

// SAFETY: MemoryPool is Send because:
// - The resident region and carved slabs are owned by the pool, not a thread
// - `blocks` is a shared borrow of a Sync source
unsafe impl<B: BlockSource + ?Sized> Send for MemoryPool<'_, B> {}

// SAFETY: MemoryPool is Sync because:
// - The resident slab is only touched under its own mutex
// - Lists, index and carved headers are only touched under the state mutex
// - Gauges and counters are atomics
unsafe impl<B: BlockSource + ?Sized> Sync for MemoryPool<'_, B> {}
