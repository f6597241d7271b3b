//! Standalone error types for strata-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.

use core::alloc::Layout;
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::error;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Allocation Errors ---
    #[error("Memory allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed { size: usize, align: usize },

    #[error("Invalid memory layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Size overflow during operation: {operation}")]
    SizeOverflow { operation: String },

    // --- Configuration Errors ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("{component} is already initialized")]
    AlreadyInitialized { component: &'static str },

    #[error("{component} is not initialized")]
    NotInitialized { component: &'static str },

    // --- Contract Violations ---
    #[error("Pointer {address:#x} was not allocated by this pool")]
    ForeignPointer { address: usize },

    #[error("Pointer {address:#x} released to a slab with no live elements")]
    DoubleFree { address: usize },

    #[error("Memory corruption detected in {component}: {details}")]
    Corruption { component: String, details: String },
}

impl MemoryError {
    /// Check if error reports a caller contract violation rather than a
    /// resource or configuration problem
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ForeignPointer { .. } | Self::DoubleFree { .. } | Self::Corruption { .. }
        )
    }

    /// Check if error is an out-of-memory condition
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "MEM:ALLOC:FAILED",
            Self::InvalidLayout { .. } => "MEM:ALLOC:LAYOUT",
            Self::SizeOverflow { .. } => "MEM:ALLOC:OVERFLOW",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::AlreadyInitialized { .. } => "MEM:CONFIG:REINIT",
            Self::NotInitialized { .. } => "MEM:CONFIG:UNINIT",
            Self::ForeignPointer { .. } => "MEM:CONTRACT:FOREIGN",
            Self::DoubleFree { .. } => "MEM:CONTRACT:DOUBLE_FREE",
            Self::Corruption { .. } => "MEM:SYSTEM:CORRUPTION",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create allocation failed error
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        Self::AllocationFailed { size, align }
    }

    /// Create allocation failed error from layout
    pub fn allocation_failed_with_layout(layout: Layout) -> Self {
        Self::allocation_failed(layout.size(), layout.align())
    }

    /// Create invalid layout error
    pub fn invalid_layout(reason: &str) -> Self {
        Self::InvalidLayout {
            reason: reason.to_string(),
        }
    }

    /// Create size overflow error
    pub fn size_overflow(operation: &str) -> Self {
        Self::SizeOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create already initialized error
    pub fn already_initialized(component: &'static str) -> Self {
        Self::AlreadyInitialized { component }
    }

    /// Create not initialized error
    pub fn not_initialized(component: &'static str) -> Self {
        Self::NotInitialized { component }
    }

    /// Create foreign pointer error
    pub fn foreign_pointer(address: usize) -> Self {
        #[cfg(feature = "logging")]
        error!("free of pointer {address:#x} that this pool never allocated");

        Self::ForeignPointer { address }
    }

    /// Create double free error
    pub fn double_free(address: usize) -> Self {
        #[cfg(feature = "logging")]
        error!("free of pointer {address:#x} into a slab with no live elements");

        Self::DoubleFree { address }
    }

    /// Create memory corruption error
    pub fn corruption(component: &str, details: &str) -> Self {
        #[cfg(feature = "logging")]
        error!("Memory corruption: {component} - {details}");

        Self::Corruption {
            component: component.to_string(),
            details: details.to_string(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================
