//! rtmem Memory Management
//!
//! This crate provides the tiny-object allocator, the pause history ring and
//! the statistics aggregator of the runtime memory subsystem, together with
//! the context object that owns them.
//!
//! # Usage
//!
//! ```rust
//! use rtmem_mm::{MemConfig, MemContext};
//!
//! let ctx = MemContext::new(MemConfig::minimal()).unwrap();
//! let obj = ctx.tiny_alloc(8, 8, false).unwrap();
//! ctx.reclaim(obj, 8).unwrap();
//!
//! let stats = ctx.read_mem_stats(true).unwrap();
//! assert_eq!(stats.mallocs, 1);
//! assert_eq!(stats.num_forced_gc, 1);
//! assert_eq!(stats.sys, stats.region_total());
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(feature = "std", test))]
extern crate std;

extern crate alloc;

// Logging macros must be defined before the modules that use them
#[macro_use]
pub mod logging;

pub mod allocator;
pub mod clock;
pub mod config;
pub mod context;
pub mod pause;
pub mod stats;

pub use rtmem_api::{AllocationRequest, ChunkSource, Clock, Collector, Error, PauseEvent, Reclaimer, Result};

pub use allocator::{ArenaHeap, ChunkInfo, Region, SizeClassStats, TinyAllocator, TinyStats};
pub use clock::ManualClock;
#[cfg(feature = "std")]
pub use clock::SystemClock;
pub use config::MemConfig;
pub use context::{
    GcFlags, MemContext, NoopCollector, global, init_global, statistics_snapshot, tiny_allocate,
};
pub use pause::{PauseHistory, PauseRing};
pub use stats::{MemStats, StatsAggregator, check_fields};

static_assertions::const_assert!(config::DEFAULT_TINY_THRESHOLD <= config::DEFAULT_TINY_CHUNK_SIZE);
static_assertions::const_assert!(config::DEFAULT_PAUSE_HISTORY.is_power_of_two());
static_assertions::const_assert!(config::MAX_TINY_CHUNK_SIZE <= allocator::heap::ARENA_ALIGN);
