//! Fine tier: slabs of fixed-size elements carved from coarse blocks

mod config;
mod header;
mod pool;
mod stats;

pub use config::PoolConfig;
pub use header::{FreeOutcome, SLAB_HEADER_SIZE, Slab, SlabHeader};
pub use pool::MemoryPool;
pub use stats::PoolStats;
