//! Integration tests for the slab element pool

use std::alloc::{Layout, alloc, dealloc};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use pretty_assertions::assert_eq;
use rstest::rstest;
use strata_memory::MemoryError;
use strata_memory::allocator::{
    BlockPool, BlockSource, MemoryPool, PAGE_SIZE, PoolConfig, SLAB_HEADER_SIZE,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Block source that fails after a fixed number of blocks
struct LimitedSource {
    remaining: AtomicUsize,
    outstanding: AtomicUsize,
}

impl LimitedSource {
    fn new(limit: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(limit),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn layout() -> Layout {
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }
}

unsafe impl BlockSource for LimitedSource {
    fn block_size(&self) -> usize {
        PAGE_SIZE
    }

    fn alloc_block(&self) -> strata_memory::MemoryResult<NonNull<u8>> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(MemoryError::allocation_failed(PAGE_SIZE, PAGE_SIZE));
        }
        let block = NonNull::new(unsafe { alloc(Self::layout()) }).unwrap();
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }

    unsafe fn free_block(&self, block: NonNull<u8>) -> strata_memory::MemoryResult<()> {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        unsafe { dealloc(block.as_ptr(), Self::layout()) };
        Ok(())
    }
}

#[test]
fn test_resident_then_carved_then_retired() {
    init_tracing();
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 64, 10).unwrap();

    let mut items: Vec<_> = (0..10).map(|_| pool.alloc().unwrap()).collect();
    assert!(items.iter().all(|p| pool.contains_resident(p.as_ptr())));
    assert_eq!(pool.slab_count(), 0);
    assert_eq!(blocks.free_count(), 4);

    items.push(pool.alloc().unwrap());
    assert_eq!(pool.slab_count(), 1);
    assert_eq!(blocks.free_count(), 3);
    assert_eq!(pool.allocated_bytes(), 11 * 64);

    for p in items.into_iter().rev() {
        unsafe { pool.free(p).unwrap() };
    }
    assert_eq!(pool.slab_count(), 0);
    assert_eq!(blocks.free_count(), 4);
    assert_eq!(pool.allocated_bytes(), 0);
    assert_eq!(pool.allocated_block_bytes(), 10 * 64 + SLAB_HEADER_SIZE);
}

#[rstest]
#[case(4096 - SLAB_HEADER_SIZE + 8)]
#[case(4096)]
#[case(1 << 20)]
fn test_oversized_element_fails_cleanly(#[case] element_size: usize) {
    let source = LimitedSource::new(8);
    let mut pool = MemoryPool::new(&source, element_size);

    let err = pool.init(16).unwrap_err();
    assert_eq!(err.code(), "MEM:CONFIG:INVALID");
    assert!(!pool.is_initialized());
    assert_eq!(pool.allocated_block_bytes(), 0);
    assert_eq!(source.outstanding.load(Ordering::SeqCst), 0);
}

#[test]
fn test_largest_element_fits_one_per_slab() {
    let blocks = BlockPool::with_cache(4096, 2).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 4096 - SLAB_HEADER_SIZE, 0).unwrap();

    let a = pool.alloc().unwrap();
    let b = pool.alloc().unwrap();
    assert_eq!(pool.slab_count(), 2);

    unsafe {
        pool.free(a).unwrap();
        assert_eq!(pool.slab_count(), 1);
        pool.free(b).unwrap();
    }
    assert_eq!(pool.slab_count(), 0);
    assert_eq!(blocks.free_count(), 2);
}

#[test]
fn test_free_resolves_owning_slab() {
    init_tracing();
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 512, 0).unwrap();
    let per_slab = (4096 - SLAB_HEADER_SIZE) / 512;

    // Carve six slabs; some blocks come from the system fallback.
    let items: Vec<_> = (0..per_slab * 6).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.slab_count(), 6);

    let block_of = |p: &NonNull<u8>| (p.as_ptr() as usize) & !(PAGE_SIZE - 1);
    let mut live: HashMap<usize, usize> = HashMap::new();
    for p in &items {
        *live.entry(block_of(p)).or_default() += 1;
    }
    assert_eq!(live.len(), 6);

    // Interleave slabs so each free hits a different owner than the last.
    let mut order: Vec<_> = items.iter().enumerate().collect();
    order.sort_by_key(|(i, _)| (i % per_slab, *i));

    for (_, p) in order {
        unsafe { pool.free(*p).unwrap() };
        let owner = live.get_mut(&block_of(p)).unwrap();
        *owner -= 1;
        let expected = live.values().filter(|&&n| n > 0).count();
        assert_eq!(pool.slab_count(), expected);
    }
    assert_eq!(blocks.free_count(), 4);
}

#[test]
fn test_reopened_slab_is_reused_before_carving() {
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 1024, 0).unwrap();

    let items: Vec<_> = (0..3).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.slab_count(), 1);

    unsafe { pool.free(items[1]).unwrap() };
    let again = pool.alloc().unwrap();
    assert_eq!(again, items[1]);
    assert_eq!(pool.slab_count(), 1);

    unsafe {
        pool.free(items[0]).unwrap();
        pool.free(items[2]).unwrap();
        pool.free(again).unwrap();
    }
}

#[test]
fn test_foreign_pointers_are_rejected() {
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 64, 4).unwrap();
    let other = MemoryPool::with_cache(&blocks, 64, 0).unwrap();

    let carved: Vec<_> = (0..5).map(|_| pool.alloc().unwrap()).collect();
    let stranger = other.alloc().unwrap();

    let mut local = 0u64;
    let on_stack = NonNull::from(&mut local).cast::<u8>();
    let misaligned = unsafe { carved[4].add(8) };
    let in_block = carved[4].as_ptr() as usize % PAGE_SIZE;
    let header = NonNull::new(carved[4].as_ptr().wrapping_sub(in_block)).unwrap();

    for bad in [on_stack, misaligned, header, stranger] {
        let err = unsafe { pool.free(bad) }.unwrap_err();
        assert!(err.is_contract_violation(), "{err}");
        assert_eq!(err.code(), "MEM:CONTRACT:FOREIGN");
    }
    assert_eq!(pool.allocated_bytes(), 5 * 64);
    assert_eq!(pool.slab_count(), 1);

    unsafe {
        other.free(stranger).unwrap();
        for p in carved {
            pool.free(p).unwrap();
        }
    }
}

#[test]
fn test_double_free_into_empty_resident_slab() {
    let blocks = BlockPool::with_cache(4096, 1).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 32, 1).unwrap();
    let p = pool.alloc().unwrap();
    unsafe {
        pool.free(p).unwrap();
        assert_eq!(
            pool.free(p).unwrap_err(),
            MemoryError::DoubleFree {
                address: p.as_ptr() as usize
            }
        );
    }
}

#[test]
fn test_refree_with_live_neighbours_is_rejected() {
    let blocks = BlockPool::with_cache(4096, 1).unwrap();
    let mut pool = MemoryPool::with_config(&blocks, 8, PoolConfig::debug());
    pool.init(3).unwrap();

    let a = pool.alloc().unwrap();
    let b = pool.alloc().unwrap();
    unsafe {
        pool.free(a).unwrap();
        let err = pool.free(a).unwrap_err();
        assert_eq!(err.code(), "MEM:CONTRACT:DOUBLE_FREE");
    }
    assert_eq!(pool.allocated_bytes(), 8);

    let c = pool.alloc().unwrap();
    let d = pool.alloc().unwrap();
    assert_eq!(c, a);
    assert!(d != b && d != c);
    assert!(pool.contains_resident(d.as_ptr()));

    unsafe {
        for p in [b, c, d] {
            pool.free(p).unwrap();
        }
    }
    assert_eq!(pool.allocated_bytes(), 0);
}

#[test]
fn test_block_exhaustion_propagates() {
    let source = LimitedSource::new(1);
    let pool = MemoryPool::with_cache(&source, 1024, 1).unwrap();

    // Resident slot, then three from the only block
    let held: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.slab_count(), 1);

    let err = pool.alloc().unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(pool.slab_count(), 1);
    assert_eq!(pool.allocated_bytes(), 4 * 1024);

    unsafe { pool.free(held[3]).unwrap() };
    let reused = pool.alloc().unwrap();
    assert_eq!(reused, held[3]);

    drop(held);
    drop(pool);
    assert_eq!(source.outstanding.load(Ordering::SeqCst), 0);
}

#[test]
fn test_drop_returns_held_slabs() {
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    {
        let pool = MemoryPool::with_cache(&blocks, 256, 2).unwrap();
        for _ in 0..40 {
            pool.alloc().unwrap();
        }
        assert!(pool.slab_count() >= 2);
        assert!(blocks.free_count() < 4);
    }
    assert_eq!(blocks.free_count(), 4);
}

#[test]
fn test_dyn_block_source() {
    let blocks = BlockPool::with_cache(4096, 2).unwrap();
    let source: &(dyn BlockSource + 'static) = &blocks;
    let pool = MemoryPool::<dyn BlockSource>::with_cache(source, 48, 0).unwrap();

    let p = pool.alloc().unwrap();
    assert_eq!(pool.element_size(), 48);
    unsafe { pool.free(p).unwrap() };
    assert_eq!(blocks.free_count(), 2);
}

#[rstest]
#[case::default(PoolConfig::default())]
#[case::production(PoolConfig::production())]
#[case::debug(PoolConfig::debug())]
#[case::performance(PoolConfig::performance())]
fn test_configs_serve_and_release(#[case] config: PoolConfig) {
    let blocks = BlockPool::with_cache(4096, 4).unwrap();
    let track = config.track_stats;
    let mut pool = MemoryPool::with_config(&blocks, 100, config);
    pool.init(8).unwrap();
    assert_eq!(pool.element_size(), 104);

    let items: Vec<_> = (0..100).map(|_| pool.alloc().unwrap()).collect();
    for p in &items {
        unsafe { std::ptr::write_bytes(p.as_ptr(), 0x5A, 104) };
    }
    for p in items {
        unsafe { pool.free(p).unwrap() };
    }

    assert_eq!(pool.slab_count(), 0);
    assert_eq!(pool.stats().is_some(), track);
    if let Some(stats) = pool.stats() {
        assert_eq!(stats.total_allocs, 100);
        assert_eq!(stats.total_deallocs, 100);
        assert_eq!(stats.peak_usage, 100 * 104);
        assert_eq!(stats.live_elements(), 0);
    }
}

#[test]
fn test_concurrent_alloc_free() {
    init_tracing();
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    const BATCH: usize = 64;

    let blocks = BlockPool::with_cache(4096, 8).unwrap();
    let pool = MemoryPool::with_cache(&blocks, 40, 32).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let pool = &pool;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let tag = (t << 32) | round;
                    let batch: Vec<_> = (0..BATCH).map(|_| pool.alloc().unwrap()).collect();
                    for p in &batch {
                        unsafe { p.as_ptr().cast::<usize>().add(1).write(tag) };
                    }
                    thread::yield_now();
                    for p in batch {
                        unsafe {
                            assert_eq!(p.as_ptr().cast::<usize>().add(1).read(), tag);
                            pool.free(p).unwrap();
                        }
                    }
                }
            });
        }
    });

    assert_eq!(pool.allocated_bytes(), 0);
    assert_eq!(pool.slab_count(), 0);
    assert_eq!(blocks.free_count(), 8);
}
