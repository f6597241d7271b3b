//! Two-tier slab allocator
//!
//! [`BlockPool`] hands out large page-aligned blocks from a pre-allocated
//! cache; [`MemoryPool`] carves those blocks into fixed-size elements. The
//! two meet at the [`BlockSource`] trait.

pub mod block;
pub mod slab;
mod traits;

pub use block::{BlockPool, BlockPoolStats, PAGE_SIZE};
pub use slab::{FreeOutcome, MemoryPool, PoolConfig, PoolStats, SLAB_HEADER_SIZE, Slab};
pub use traits::BlockSource;
