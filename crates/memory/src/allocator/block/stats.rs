//! Block pool statistics

use core::fmt;

/// Point-in-time counters of a [`BlockPool`](super::BlockPool)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockPoolStats {
    /// Size of every block in bytes
    pub block_size: usize,
    /// Blocks in the cache region
    pub cache_blocks: usize,
    /// Cache blocks currently free
    pub free_blocks: usize,
    /// Allocations served from the cache
    pub cache_hits: usize,
    /// Allocations that went to the system allocator
    pub fallback_allocs: usize,
    /// Non-cache blocks returned to the system allocator
    pub fallback_frees: usize,
}

impl BlockPoolStats {
    /// Cache blocks currently handed out
    pub fn cache_in_use(&self) -> usize {
        self.cache_blocks.saturating_sub(self.free_blocks)
    }

    /// Fallback blocks still outstanding
    pub fn fallback_outstanding(&self) -> usize {
        self.fallback_allocs.saturating_sub(self.fallback_frees)
    }

    /// Fraction of allocations served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.fallback_allocs;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for BlockPoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks: {}/{} free ({} B each), hits: {}, fallback: {} alloc / {} free",
            self.free_blocks,
            self.cache_blocks,
            self.block_size,
            self.cache_hits,
            self.fallback_allocs,
            self.fallback_frees
        )
    }
}
