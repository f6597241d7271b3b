//! # strata-memory
//!
//! Raw memory building blocks for the Strata storage engine.
//!
//! The crate provides a two-tier slab allocator:
//! - [`BlockPool`]: a cache of page-aligned, fixed-size blocks with
//!   system-allocator fallback
//! - [`MemoryPool`]: fixed-size elements carved from those blocks, with a
//!   resident slab for the warm working set
//! - [`list`]: the intrusive list that threads slabs together
//!
//! ## Quick Start
//!
//! ```rust
//! use strata_memory::prelude::*;
//!
//! let blocks = BlockPool::with_cache(4096, 16)?;
//! let pool = MemoryPool::with_cache(&blocks, 64, 128)?;
//!
//! let element = pool.alloc()?;
//! // SAFETY: `element` came from `pool` and is not used afterwards.
//! unsafe { pool.free(element)? };
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `logging` (default): `tracing` events on initialisation, slab carve and
//!   retire, and contract violations

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Precision loss in usize -> f64 casts is acceptable for stats
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::inline_always)]
// Slab headers and free-list links are cast from raw bytes
#![allow(clippy::cast_ptr_alignment)]

// Error types
pub mod error;

// Core modules
pub mod allocator;
pub mod list;
pub mod utils;

pub use crate::allocator::{BlockPool, BlockSource, MemoryPool, PoolConfig};
pub use crate::error::{MemoryError, MemoryResult, Result};

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::error::{MemoryError, MemoryResult, Result};

    pub use crate::allocator::{
        BlockPool, BlockPoolStats, BlockSource, MemoryPool, PoolConfig, PoolStats,
    };
}
