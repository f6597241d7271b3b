//! Alignment and counter helpers shared by the block pool and the slab allocator

use core::sync::atomic::{AtomicUsize, Ordering};

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use strata_memory::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given alignment
///
/// # Examples
/// ```
/// use strata_memory::utils::is_aligned;
///
/// assert!(is_aligned(8192, 4096));
/// assert!(!is_aligned(4097, 4096));
/// ```
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Raises `current` to `value` if `value` is larger
#[inline]
pub fn atomic_max(current: &AtomicUsize, value: usize) {
    let mut max = current.load(Ordering::Relaxed);
    while value > max {
        match current.compare_exchange_weak(max, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(x) => max = x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_pointer_width() {
        let word = size_of::<usize>();
        assert_eq!(align_up(1, word), word);
        assert_eq!(align_up(word, word), word);
        assert_eq!(align_up(60, 8), 64);
    }

    #[test]
    fn test_atomic_max() {
        let peak = AtomicUsize::new(10);
        atomic_max(&peak, 5);
        assert_eq!(peak.load(Ordering::Relaxed), 10);
        atomic_max(&peak, 42);
        assert_eq!(peak.load(Ordering::Relaxed), 42);
    }
}
