//! Slab pool configuration

/// Configuration for [`MemoryPool`](super::MemoryPool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern byte for newly allocated elements (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for released elements (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Production configuration - counters on, no fills
    #[must_use]
    pub fn production() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - counters and fill patterns
    #[must_use]
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }

    /// Performance configuration - minimal overhead
    #[must_use]
    pub fn performance() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }
}
