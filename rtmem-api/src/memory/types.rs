//! Memory management types

use crate::core::types::{Nanoseconds, Size};

/// A single small-object allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Requested size in bytes
    pub size: Size,
    /// Required alignment, a power of two
    pub align: Size,
    /// Whether the object may hold outgoing references
    pub needs_pointers: bool,
}

impl AllocationRequest {
    /// Creates a new allocation request
    pub const fn new(size: Size, align: Size, needs_pointers: bool) -> Self {
        Self {
            size,
            align,
            needs_pointers,
        }
    }

    /// Request for a pointer-free object
    pub const fn noscan(size: Size, align: Size) -> Self {
        Self::new(size, align, false)
    }

    /// Request for a pointer-bearing object
    pub const fn scan(size: Size, align: Size) -> Self {
        Self::new(size, align, true)
    }
}

/// Completion event for one collection pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PauseEvent {
    /// How long the world was stopped
    pub duration_ns: Nanoseconds,
    /// Clock reading when the pause ended
    pub end_ns: Nanoseconds,
    /// Explicitly requested rather than triggered by the heap threshold
    pub forced: bool,
}

impl PauseEvent {
    /// Creates a new pause event
    pub const fn new(duration_ns: Nanoseconds, end_ns: Nanoseconds, forced: bool) -> Self {
        Self {
            duration_ns,
            end_ns,
            forced,
        }
    }
}
