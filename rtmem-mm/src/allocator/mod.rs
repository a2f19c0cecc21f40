//! Memory allocator module
//!
//! The arena heap stands in for the general allocator; the tiny allocator
//! packs small objects into chunks obtained from it.

pub mod heap;
pub mod tiny;

pub use heap::{ArenaHeap, HeapUsage, Region, RegionUsage};
pub use tiny::{ChunkInfo, SizeClassStats, TinyAllocator, TinyStats};
