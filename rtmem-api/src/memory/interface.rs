//! Memory management interface
//!
//! The tiny allocator and the statistics aggregator sit between two
//! collaborators they do not implement: the general allocator, which hands out
//! whole chunks, and the collector, which decides what is dead. Both are
//! reached only through the traits below.

use core::ptr::NonNull;

use crate::error::Result;
use crate::core::types::{Nanoseconds, Size};

/// Trait for the general allocator backing the tiny allocator
pub trait ChunkSource: Send + Sync {
    /// Returns a zeroed region of `size` bytes aligned to `size`.
    ///
    /// `size` is a power of two. Fails with `Error::OutOfMemory` when no
    /// memory is left; nothing is reserved in that case.
    fn new_chunk(&self, size: Size) -> Result<NonNull<u8>>;

    /// Gives a chunk obtained from `new_chunk` back.
    ///
    /// # Safety
    /// `chunk` must come from `new_chunk` on the same source with the same
    /// `size` and must not be referenced afterwards.
    unsafe fn release_chunk(&self, chunk: NonNull<u8>, size: Size);
}

/// Trait for reclaiming objects the collector found unreachable
pub trait Reclaimer {
    /// Marks the object at `addr` of `size` bytes as freed.
    fn reclaim(&self, addr: NonNull<u8>, size: Size) -> Result<()>;
}

/// Trait for the garbage collector driving full collection passes
pub trait Collector: Send + Sync {
    /// Runs mark and sweep with the world stopped, reclaiming dead objects
    /// through `heap`.
    fn mark_and_sweep(&self, heap: &dyn Reclaimer) -> Result<()>;
}

/// Trait for the time source used to stamp pauses
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds
    fn now_ns(&self) -> Nanoseconds;
}
