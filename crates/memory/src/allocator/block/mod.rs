//! Coarse tier: a cache of page-aligned blocks with system fallback

mod pool;
mod stats;

pub use pool::BlockPool;
pub use stats::BlockPoolStats;

/// Alignment of every block and the granularity of block sizes
pub const PAGE_SIZE: usize = 4096;
