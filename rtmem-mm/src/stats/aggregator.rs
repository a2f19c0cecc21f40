//! Statistics aggregation
//!
//! Composes the arena heap counters, the tiny allocator counters and the pause
//! ring into one [`MemStats`]. The counters are read with the world stopped so
//! that the heap partition and the object counts come from the same instant.

use rtmem_api::Result;

use super::MemStats;
use crate::allocator::heap::Region;
use crate::context::{GcFlags, MemContext};

/// Saturating conversion for the 32-bit collection counters
fn gc_count(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Builds statistics reports; holds no state between calls
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsAggregator;

impl StatsAggregator {
    /// Takes a report of `ctx`
    ///
    /// With `force_full_collection` a forced collection runs first, so dead
    /// objects are reclaimed and the pause shows up in the report. Otherwise
    /// the values are whatever the counters hold right now.
    pub fn snapshot(ctx: &MemContext, force_full_collection: bool) -> Result<MemStats> {
        if force_full_collection {
            ctx.collect(true)?;
        }

        let stats = {
            let _world = ctx.stop_the_world();
            Self::read_counters(ctx)
        };

        if ctx.config().validate_stats {
            if let Err(err) = stats.check_invariants() {
                crate::mm_error!("inconsistent memory statistics: {}", err);
                return Err(err);
            }
        }

        Ok(stats)
    }

    fn read_counters(ctx: &MemContext) -> MemStats {
        let tiny = ctx.tiny().stats();
        let heap = ctx.heap().usage();
        let region = |r: Region| ctx.heap().region_usage(r);
        let stack = region(Region::Stack);
        let span = region(Region::Span);
        let cache = region(Region::Cache);
        let buck_hash = region(Region::BucketHash);
        let collector = region(Region::Collector);
        let other = region(Region::Other);
        let history = ctx.pauses().snapshot();
        let flags = ctx.gc_flags();

        let mut stats = MemStats {
            alloc: tiny.live_bytes,
            total_alloc: tiny.total_bytes,
            lookups: tiny.lookups,
            mallocs: tiny.mallocs,
            frees: tiny.frees,

            heap_alloc: tiny.live_bytes,
            heap_sys: heap.heap_sys as u64,
            heap_idle: heap.heap_idle() as u64,
            heap_inuse: heap.heap_inuse as u64,
            heap_released: heap.heap_released as u64,
            heap_objects: tiny.live_objects(),

            stack_inuse: stack.inuse as u64,
            stack_sys: stack.sys as u64,
            mspan_inuse: span.inuse as u64,
            mspan_sys: span.sys as u64,
            mcache_inuse: cache.inuse as u64,
            mcache_sys: cache.sys as u64,
            buck_hash_sys: buck_hash.sys as u64,
            gc_sys: collector.sys as u64,
            other_sys: other.sys as u64,

            next_gc: ctx.next_gc(),
            last_gc: history.last_pause_end(),
            pause_total_ns: history.pause_total_ns,
            num_gc: gc_count(history.num_gc),
            num_forced_gc: gc_count(history.num_forced_gc),
            pause_ns: history.pause_ns,
            pause_end: history.pause_end,
            gc_cpu_fraction: ctx.gc_cpu_fraction(),
            enable_gc: flags.contains(GcFlags::ENABLE_GC),
            debug_gc: flags.contains(GcFlags::DEBUG_GC),

            by_size: tiny.by_size,
            ..MemStats::default()
        };
        stats.sys = stats.region_total();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemConfig;
    use alloc::boxed::Box;
    use rtmem_api::Error;

    fn context() -> MemContext {
        MemContext::new(MemConfig::minimal().with_validation(true))
            .unwrap()
            .with_clock(Box::new(ManualClock::ticking(1_000, 250)))
    }

    #[test]
    fn test_fresh_context_report() {
        let ctx = context();
        let stats = StatsAggregator::snapshot(&ctx, false).unwrap();
        assert_eq!(stats.mallocs, 0);
        assert_eq!(stats.heap_sys, 0);
        assert_eq!(stats.num_gc, 0);
        assert_eq!(stats.last_gc, 0);
        assert!(stats.sys > 0);
        assert_eq!(stats.sys, stats.region_total());
        assert_eq!(stats.pause_ns.len(), 16);
        assert!(stats.enable_gc);
    }

    #[test]
    fn test_forced_snapshot_records_pause() {
        let ctx = context();
        ctx.tiny_alloc(8, 8, false).unwrap();
        let stats = StatsAggregator::snapshot(&ctx, true).unwrap();
        assert_eq!(stats.num_gc, 1);
        assert_eq!(stats.num_forced_gc, 1);
        assert_eq!(stats.pause_ns[0], 250);
        assert_eq!(stats.last_gc, stats.pause_end[0]);
        assert_eq!(stats.heap_alloc, 8);
        assert_eq!(stats.heap_objects, 1);
        assert_eq!(stats.heap_idle + stats.heap_inuse, stats.heap_sys);
    }

    #[test]
    fn test_quiescent_snapshots_are_identical() {
        let ctx = context();
        ctx.tiny_alloc(3, 1, true).unwrap();
        ctx.collect(true).unwrap();
        let first = StatsAggregator::snapshot(&ctx, false).unwrap();
        let second = StatsAggregator::snapshot(&ctx, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_counts_saturate() {
        assert_eq!(gc_count(7), 7);
        assert_eq!(gc_count(u64::MAX), u32::MAX);
    }

    #[test]
    fn test_mismatched_reclaim_is_a_fault() {
        let ctx = context();
        let addr = ctx.tiny_alloc(1, 1, false).unwrap();
        // Reclaiming more bytes than were committed wraps the live counter.
        ctx.reclaim(addr, 8).unwrap();
        let err = StatsAggregator::snapshot(&ctx, false).unwrap_err();
        assert!(matches!(err, Error::InternalConsistencyFault(_)));

        let lenient = MemContext::new(MemConfig::minimal().with_validation(false)).unwrap();
        let addr = lenient.tiny_alloc(1, 1, false).unwrap();
        lenient.reclaim(addr, 8).unwrap();
        assert!(StatsAggregator::snapshot(&lenient, false).is_ok());
    }
}
