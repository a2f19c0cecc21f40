//! Runtime memory configuration

use rtmem_api::error::{config_error, Result};

/// Default tiny chunk size in bytes
pub const DEFAULT_TINY_CHUNK_SIZE: usize = 16;

/// Default largest request served by the tiny allocator
pub const DEFAULT_TINY_THRESHOLD: usize = 16;

/// Default pause history length
pub const DEFAULT_PAUSE_HISTORY: usize = 256;

/// Heap size below which no automatic collection is triggered
pub const DEFAULT_MIN_NEXT_GC: u64 = 4 * 1024 * 1024;

/// Largest supported tiny chunk (must fit the arena alignment)
pub const MAX_TINY_CHUNK_SIZE: usize = 4096;

/// Upper bound on tiny allocator shards
pub const MAX_TINY_SHARDS: usize = 256;

/// Runtime memory configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MemConfig {
    /// Size of a tiny chunk in bytes (power of two)
    pub tiny_chunk_size: usize,
    /// Largest request size served by the tiny allocator
    pub tiny_threshold: usize,
    /// Number of independent current-chunk slots
    pub tiny_shards: usize,
    /// Size of one heap arena (power of two)
    pub arena_size: usize,
    /// Heap reservation limit; arenas beyond it fail with out of memory
    pub max_heap_bytes: usize,
    /// Capacity of the pause history ring (power of two)
    pub pause_history: usize,
    /// Heap growth percentage that triggers a collection; negative disables
    pub gc_percent: i32,
    /// Floor for the next collection threshold
    pub min_next_gc: u64,
    /// Bytes reserved for task stacks at startup
    pub stack_reserve: usize,
    /// Number of profiling hash buckets reserved at startup
    pub profile_buckets: usize,
    /// Check every report invariant before returning it
    pub validate_stats: bool,
    /// Collector debug mode flag, reported verbatim
    pub debug_gc: bool,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            tiny_chunk_size: DEFAULT_TINY_CHUNK_SIZE,
            tiny_threshold: DEFAULT_TINY_THRESHOLD,
            tiny_shards: 1,
            arena_size: if cfg!(feature = "minimal") { 16 * 1024 } else { 64 * 1024 },
            max_heap_bytes: if cfg!(feature = "minimal") { 4 * 1024 * 1024 } else { 64 * 1024 * 1024 },
            pause_history: DEFAULT_PAUSE_HISTORY,
            gc_percent: 100,
            min_next_gc: DEFAULT_MIN_NEXT_GC,
            stack_reserve: 32 * 1024,
            profile_buckets: 1024,
            validate_stats: cfg!(any(debug_assertions, feature = "validate")),
            debug_gc: false,
        }
    }
}

impl MemConfig {
    /// Creates the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Small footprint configuration for tests and embedded use
    pub fn minimal() -> Self {
        Self {
            arena_size: 4096,
            max_heap_bytes: 256 * 1024,
            pause_history: 16,
            stack_reserve: 8 * 1024,
            profile_buckets: 64,
            ..Self::default()
        }
    }

    /// Configuration for many concurrent allocating threads
    pub fn server(shards: usize) -> Self {
        Self {
            tiny_shards: shards,
            arena_size: 1024 * 1024,
            max_heap_bytes: 1024 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Sets the tiny chunk size
    pub fn with_tiny_chunk_size(mut self, size: usize) -> Self {
        self.tiny_chunk_size = size;
        self
    }

    /// Sets the tiny threshold
    pub fn with_tiny_threshold(mut self, threshold: usize) -> Self {
        self.tiny_threshold = threshold;
        self
    }

    /// Sets the number of tiny shards
    pub fn with_tiny_shards(mut self, shards: usize) -> Self {
        self.tiny_shards = shards;
        self
    }

    /// Sets the arena size
    pub fn with_arena_size(mut self, size: usize) -> Self {
        self.arena_size = size;
        self
    }

    /// Sets the heap reservation limit
    pub fn with_max_heap_bytes(mut self, bytes: usize) -> Self {
        self.max_heap_bytes = bytes;
        self
    }

    /// Sets the pause history capacity
    pub fn with_pause_history(mut self, capacity: usize) -> Self {
        self.pause_history = capacity;
        self
    }

    /// Sets the collection trigger percentage
    pub fn with_gc_percent(mut self, percent: i32) -> Self {
        self.gc_percent = percent;
        self
    }

    /// Sets the floor of the collection threshold
    pub fn with_min_next_gc(mut self, bytes: u64) -> Self {
        self.min_next_gc = bytes;
        self
    }

    /// Enables or disables report validation
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_stats = validate;
        self
    }

    /// Sets the collector debug flag
    pub fn with_debug_gc(mut self, debug: bool) -> Self {
        self.debug_gc = debug;
        self
    }

    /// Checks the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if !self.tiny_chunk_size.is_power_of_two()
            || self.tiny_chunk_size < 8
            || self.tiny_chunk_size > MAX_TINY_CHUNK_SIZE
        {
            return Err(config_error("tiny_chunk_size must be a power of two in 8..=4096"));
        }
        if self.tiny_threshold == 0 || self.tiny_threshold > self.tiny_chunk_size {
            return Err(config_error("tiny_threshold must be in 1..=tiny_chunk_size"));
        }
        if self.tiny_shards == 0 || self.tiny_shards > MAX_TINY_SHARDS {
            return Err(config_error("tiny_shards must be in 1..=256"));
        }
        if !self.arena_size.is_power_of_two() || self.arena_size < MAX_TINY_CHUNK_SIZE {
            return Err(config_error("arena_size must be a power of two of at least 4096"));
        }
        if self.max_heap_bytes < self.arena_size {
            return Err(config_error("max_heap_bytes must hold at least one arena"));
        }
        if !self.pause_history.is_power_of_two() {
            return Err(config_error("pause_history must be a power of two"));
        }
        Ok(())
    }
}
