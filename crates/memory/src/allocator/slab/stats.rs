//! Slab pool statistics

/// Statistics for [`MemoryPool`](super::MemoryPool)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total allocations performed
    pub total_allocs: usize,
    /// Total deallocations performed
    pub total_deallocs: usize,
    /// Peak live element bytes
    pub peak_usage: usize,
    /// Current live element bytes
    pub current_usage: usize,
    /// Bytes held in slabs (resident slab plus carved blocks)
    pub slab_bytes: usize,
    /// Size of each element
    pub element_size: usize,
    /// Carved slabs with spare capacity
    pub partial_slabs: usize,
    /// Carved slabs with no spare capacity
    pub full_slabs: usize,
}

impl PoolStats {
    /// Live elements
    pub fn live_elements(&self) -> usize {
        self.current_usage.checked_div(self.element_size).unwrap_or(0)
    }

    /// Share of slab bytes occupied by live elements
    pub fn utilization(&self) -> f64 {
        if self.slab_bytes == 0 {
            0.0
        } else {
            self.current_usage as f64 / self.slab_bytes as f64
        }
    }
}
