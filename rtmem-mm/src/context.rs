//! Runtime memory context
//!
//! [`MemContext`] owns every piece of the subsystem: configuration, arena heap,
//! tiny allocator, pause ring, collector and clock, initialised in that order.
//! A process normally has exactly one, installed with [`init_global`] and
//! never torn down. The free functions at the bottom operate on it.
//!
//! Locking: allocation, reclaim and collection hold the world lock shared;
//! a statistics snapshot holds it exclusively, so every counter in a report
//! is read at the same instant. Collections are serialised by their own lock.
//! Inside the allocator the order is shard, chunk registry, heap.

extern crate alloc;

use alloc::boxed::Box;
use core::fmt;
use core::mem;
use core::ptr::NonNull;

use rtmem_api::sync::{
    AtomicI32, AtomicU32, AtomicU64, Mutex, MutexGuard, Once, Ordering, RwLock, RwLockWriteGuard,
};
use rtmem_api::{AllocationRequest, Clock, Collector, ErrorContext, PauseEvent, Reclaimer, Result, Size};

use crate::allocator::heap::{ArenaHeap, Region};
use crate::allocator::tiny::{ChunkInfo, TinyAllocator};
use crate::clock::default_clock;
use crate::config::MemConfig;
use crate::pause::PauseRing;
use crate::stats::{MemStats, StatsAggregator};

bitflags::bitflags! {
    /// Collector state flags reported in every snapshot
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcFlags: u32 {
        /// Automatic collection is enabled
        const ENABLE_GC = 0b0000_0001;
        /// Collector debug mode
        const DEBUG_GC = 0b0000_0010;
    }
}

/// Collector that finds nothing to reclaim
///
/// Used until a real collector is attached with [`MemContext::with_collector`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollector;

impl Collector for NoopCollector {
    fn mark_and_sweep(&self, _heap: &dyn Reclaimer) -> Result<()> {
        Ok(())
    }
}

/// The runtime memory context
pub struct MemContext {
    config: MemConfig,
    heap: ArenaHeap,
    tiny: TinyAllocator,
    pauses: PauseRing,
    collector: Box<dyn Collector>,
    clock: Box<dyn Clock>,
    start_ns: u64,

    world: RwLock<()>,
    gc_lock: Mutex<()>,
    flags: AtomicU32,
    gc_percent: AtomicI32,
    next_gc: AtomicU64,
    /// `f64` bits of the paused share of elapsed time
    gc_cpu_fraction: AtomicU64,
}

static_assertions::assert_impl_all!(MemContext: Send, Sync);

impl MemContext {
    /// Creates a context from a validated configuration
    pub fn new(config: MemConfig) -> Result<Self> {
        config.validate().context("memory context")?;

        let heap = ArenaHeap::new(config.arena_size, config.max_heap_bytes);
        let tiny = TinyAllocator::new(config.tiny_chunk_size, config.tiny_threshold, config.tiny_shards);
        let pauses = PauseRing::new(config.pause_history);
        let clock = default_clock();
        let start_ns = clock.now_ns();

        // Fixed metadata is charged once; arenas charge span and bitmap bytes as they grow.
        heap.reserve_region(Region::Stack, config.stack_reserve, config.stack_reserve);
        let cache = tiny.metadata_bytes();
        heap.reserve_region(Region::Cache, cache, cache);
        let buckets = config.profile_buckets * mem::size_of::<u64>();
        heap.reserve_region(Region::BucketHash, buckets, buckets);
        let other = pauses.footprint() + mem::size_of::<Self>();
        heap.reserve_region(Region::Other, other, other);

        let mut flags = GcFlags::empty();
        flags.set(GcFlags::ENABLE_GC, config.gc_percent >= 0);
        flags.set(GcFlags::DEBUG_GC, config.debug_gc);

        crate::mm_info!(
            "memory context: tiny chunk {} threshold {} shards {}, arena {} limit {}, {} pause slots",
            config.tiny_chunk_size,
            config.tiny_threshold,
            config.tiny_shards,
            config.arena_size,
            config.max_heap_bytes,
            config.pause_history
        );

        Ok(Self {
            gc_percent: AtomicI32::new(config.gc_percent),
            next_gc: AtomicU64::new(config.min_next_gc),
            config,
            heap,
            tiny,
            pauses,
            collector: Box::new(NoopCollector),
            clock,
            start_ns,
            world: RwLock::new(()),
            gc_lock: Mutex::new(()),
            flags: AtomicU32::new(flags.bits()),
            gc_cpu_fraction: AtomicU64::new(0f64.to_bits()),
        })
    }

    /// Replaces the collector
    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    /// Replaces the clock, restarting the elapsed-time base
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.start_ns = clock.now_ns();
        self.clock = clock;
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &MemConfig {
        &self.config
    }

    /// The arena heap
    pub fn heap(&self) -> &ArenaHeap {
        &self.heap
    }

    /// The tiny allocator
    pub fn tiny(&self) -> &TinyAllocator {
        &self.tiny
    }

    /// The pause ring
    pub fn pauses(&self) -> &PauseRing {
        &self.pauses
    }

    /// Allocates a tiny object from shard 0
    pub fn tiny_alloc(&self, size: Size, align: Size, needs_pointers: bool) -> Result<NonNull<u8>> {
        self.tiny_alloc_on(0, AllocationRequest::new(size, align, needs_pointers))
    }

    /// Allocates a tiny object from the given shard
    ///
    /// May run an unforced collection afterwards when the heap has grown past
    /// the collection threshold.
    pub fn tiny_alloc_on(&self, shard: usize, request: AllocationRequest) -> Result<NonNull<u8>> {
        let addr = {
            let _world = self.world.read();
            self.tiny.allocate_on(&self.heap, shard, request)?
        };

        if self.gc_flags().contains(GcFlags::ENABLE_GC)
            && self.tiny.live_bytes() >= self.next_gc.load(Ordering::Acquire)
        {
            self.trigger_gc();
        }

        Ok(addr)
    }

    /// Runs an unforced collection unless one is already in progress
    fn trigger_gc(&self) {
        let Some(guard) = self.gc_lock.try_lock() else {
            return;
        };
        if let Err(err) = self.collect_locked(guard, false) {
            crate::mm_warn!("automatic collection failed: {}", err);
        }
    }

    /// Reclaims a dead tiny object
    pub fn reclaim(&self, addr: NonNull<u8>, size: Size) -> Result<()> {
        let _world = self.world.read();
        self.tiny.reclaim(&self.heap, addr, size)
    }

    /// Finds the tiny chunk containing `addr`
    pub fn lookup(&self, addr: NonNull<u8>) -> Option<ChunkInfo> {
        let _world = self.world.read();
        self.tiny.lookup(addr)
    }

    /// Runs one full collection and records its pause
    pub fn collect(&self, forced: bool) -> Result<PauseEvent> {
        let guard = self.gc_lock.lock();
        self.collect_locked(guard, forced)
    }

    fn collect_locked(&self, _guard: MutexGuard<'_, ()>, forced: bool) -> Result<PauseEvent> {
        let start = self.clock.now_ns();
        self.collector.mark_and_sweep(self)?;
        let end = self.clock.now_ns();

        let event = PauseEvent::new(end.saturating_sub(start), end, forced);
        self.record_pause(event);

        let gc_percent = self.gc_percent.load(Ordering::Acquire);
        if gc_percent >= 0 {
            self.next_gc.store(self.goal(gc_percent), Ordering::Release);
        }

        crate::mm_debug!(
            "gc #{} ({}): paused {} ns, live {} bytes, next at {}",
            self.pauses.total_pauses(),
            if forced { "forced" } else { "automatic" },
            event.duration_ns,
            self.tiny.live_bytes(),
            self.next_gc()
        );
        Ok(event)
    }

    /// Heap size at which the next collection starts
    fn goal(&self, gc_percent: i32) -> u64 {
        let live = self.tiny.live_bytes() as u128;
        let goal = live * (100 + gc_percent as u128) / 100;
        u64::try_from(goal).unwrap_or(u64::MAX).max(self.config.min_next_gc)
    }

    /// Records a pause completed outside [`collect`](Self::collect)
    pub fn record_pause(&self, event: PauseEvent) {
        self.pauses.record(event);

        let elapsed = event.end_ns.saturating_sub(self.start_ns);
        let fraction = if elapsed == 0 {
            0.0
        } else {
            self.pauses.snapshot().pause_total_ns as f64 / elapsed as f64
        };
        self.gc_cpu_fraction.store(fraction.to_bits(), Ordering::Release);
    }

    /// Sets the collection trigger percentage, returning the previous one
    ///
    /// A negative value disables automatic collection.
    pub fn set_gc_percent(&self, percent: i32) -> i32 {
        let _guard = self.gc_lock.lock();
        let previous = self.gc_percent.swap(percent, Ordering::AcqRel);
        if percent >= 0 {
            self.flags.fetch_or(GcFlags::ENABLE_GC.bits(), Ordering::AcqRel);
            self.next_gc.store(self.goal(percent), Ordering::Release);
        } else {
            self.flags.fetch_and(!GcFlags::ENABLE_GC.bits(), Ordering::AcqRel);
        }
        previous
    }

    /// Current collection trigger percentage
    pub fn gc_percent(&self) -> i32 {
        self.gc_percent.load(Ordering::Acquire)
    }

    /// Collector flags
    pub fn gc_flags(&self) -> GcFlags {
        GcFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Heap size that triggers the next collection
    pub fn next_gc(&self) -> u64 {
        self.next_gc.load(Ordering::Acquire)
    }

    /// Share of elapsed time spent in pauses, as of the last pause
    pub fn gc_cpu_fraction(&self) -> f64 {
        f64::from_bits(self.gc_cpu_fraction.load(Ordering::Acquire))
    }

    /// Reads a statistics report
    pub fn read_mem_stats(&self, force_full_collection: bool) -> Result<MemStats> {
        StatsAggregator::snapshot(self, force_full_collection)
    }

    /// Excludes every allocator mutation while held
    pub(crate) fn stop_the_world(&self) -> RwLockWriteGuard<'_, ()> {
        self.world.write()
    }
}

impl Reclaimer for MemContext {
    fn reclaim(&self, addr: NonNull<u8>, size: Size) -> Result<()> {
        MemContext::reclaim(self, addr, size)
    }
}

impl fmt::Debug for MemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemContext")
            .field("config", &self.config)
            .field("heap", &self.heap.usage())
            .field("live_bytes", &self.tiny.live_bytes())
            .field("num_gc", &self.pauses.total_pauses())
            .field("flags", &self.gc_flags())
            .finish()
    }
}

static GLOBAL: Once<MemContext> = Once::new();

/// Installs the global context
///
/// The first successful call wins; later calls return the existing context
/// and ignore their configuration.
pub fn init_global(config: MemConfig) -> Result<&'static MemContext> {
    if let Some(ctx) = GLOBAL.get() {
        crate::mm_debug!("global memory context already initialised");
        return Ok(ctx);
    }
    GLOBAL.try_call_once(|| MemContext::new(config))
}

/// The global context, if installed
pub fn global() -> Option<&'static MemContext> {
    GLOBAL.get()
}

fn global_or_default() -> Result<&'static MemContext> {
    match GLOBAL.get() {
        Some(ctx) => Ok(ctx),
        None => init_global(MemConfig::default()),
    }
}

/// Allocates a tiny object from the global context
///
/// The context is created with the default configuration on first use.
pub fn tiny_allocate(size: Size, align: Size, needs_pointers: bool) -> Result<NonNull<u8>> {
    global_or_default()?.tiny_alloc(size, align, needs_pointers)
}

/// Reads a statistics report of the global context
pub fn statistics_snapshot(force_full_collection: bool) -> Result<MemStats> {
    global_or_default()?.read_mem_stats(force_full_collection)
}
