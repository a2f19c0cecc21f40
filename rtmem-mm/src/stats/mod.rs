//! Memory statistics
//!
//! `MemStats` is the one report the subsystem exposes to monitoring tools.
//! Every report handed out satisfies the invariants in [`MemStats::check_invariants`]
//! when validation is enabled; a violation means bookkeeping is broken
//! somewhere upstream and is surfaced as an internal consistency fault.

extern crate alloc;

pub mod aggregator;
pub mod checks;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use rtmem_api::error::{consistency_fault, Result};

use crate::allocator::tiny::SizeClassStats;

pub use aggregator::StatsAggregator;
pub use checks::{check_fields, FieldCheck, FieldViolation, MEMSTATS_FIELD_CHECKS};

/// Ceiling for byte and object counters; anything above is wraparound
pub const COUNTER_CEILING: u64 = 10_000_000_000;

/// Ceiling for cumulative byte and duration counters
pub const CUMULATIVE_CEILING: u64 = 100_000_000_000;

/// Ceiling for collection counts
pub const GC_COUNT_CEILING: u64 = 1_000_000_000;

/// Point-in-time report of allocator and collector state
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemStats {
    /// Bytes of live objects
    pub alloc: u64,
    /// Bytes ever allocated
    pub total_alloc: u64,
    /// Bytes reserved from the system, sum of the seven regions
    pub sys: u64,
    /// Pointer lookups performed
    pub lookups: u64,
    /// Objects ever allocated
    pub mallocs: u64,
    /// Objects ever freed
    pub frees: u64,

    /// Bytes of live heap objects
    pub heap_alloc: u64,
    /// Bytes of reserved heap arenas
    pub heap_sys: u64,
    /// Heap bytes not handed out
    pub heap_idle: u64,
    /// Heap bytes handed out as chunks
    pub heap_inuse: u64,
    /// Heap bytes returned to the system
    pub heap_released: u64,
    /// Live heap objects
    pub heap_objects: u64,

    /// Stack bytes in use
    pub stack_inuse: u64,
    /// Stack bytes reserved
    pub stack_sys: u64,
    /// Span descriptor bytes in use
    pub mspan_inuse: u64,
    /// Span descriptor bytes reserved
    pub mspan_sys: u64,
    /// Allocation cache bytes in use
    pub mcache_inuse: u64,
    /// Allocation cache bytes reserved
    pub mcache_sys: u64,
    /// Profiling bucket hash table bytes
    pub buck_hash_sys: u64,
    /// Collector bookkeeping bytes
    pub gc_sys: u64,
    /// Remaining runtime bytes
    pub other_sys: u64,

    /// Heap size that triggers the next collection
    pub next_gc: u64,
    /// End of the last pause, zero before the first
    pub last_gc: u64,
    /// Sum of every pause duration
    pub pause_total_ns: u64,
    /// Recent pause durations, slot `n mod C` for pause `n`
    pub pause_ns: Vec<u64>,
    /// Recent pause end timestamps, parallel to `pause_ns`
    pub pause_end: Vec<u64>,
    /// Completed collections
    pub num_gc: u32,
    /// Collections requested explicitly
    pub num_forced_gc: u32,
    /// Fraction of elapsed time spent paused
    pub gc_cpu_fraction: f64,
    /// Automatic collection enabled
    pub enable_gc: bool,
    /// Collector debug mode
    pub debug_gc: bool,

    /// Per tiny size class counters
    pub by_size: Vec<SizeClassStats>,
}

/// Value of one report field, as enumerated by [`MemStats::fields`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Unsigned counter
    Uint(u64),
    /// Floating point value
    Float(f64),
    /// Flag
    Bool(bool),
    /// Array field, by length
    Array(usize),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Uint(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Array(len) => write!(f, "[{} entries]", len),
        }
    }
}

impl MemStats {
    /// Sum of the seven region byte counts
    pub fn region_total(&self) -> u64 {
        [
            self.heap_sys,
            self.stack_sys,
            self.mspan_sys,
            self.mcache_sys,
            self.buck_hash_sys,
            self.gc_sys,
            self.other_sys,
        ]
        .iter()
        .fold(0u64, |acc, &bytes| acc.saturating_add(bytes))
    }

    /// Every report field by name, in declaration order
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        use FieldValue::*;
        alloc::vec![
            ("alloc", Uint(self.alloc)),
            ("total_alloc", Uint(self.total_alloc)),
            ("sys", Uint(self.sys)),
            ("lookups", Uint(self.lookups)),
            ("mallocs", Uint(self.mallocs)),
            ("frees", Uint(self.frees)),
            ("heap_alloc", Uint(self.heap_alloc)),
            ("heap_sys", Uint(self.heap_sys)),
            ("heap_idle", Uint(self.heap_idle)),
            ("heap_inuse", Uint(self.heap_inuse)),
            ("heap_released", Uint(self.heap_released)),
            ("heap_objects", Uint(self.heap_objects)),
            ("stack_inuse", Uint(self.stack_inuse)),
            ("stack_sys", Uint(self.stack_sys)),
            ("mspan_inuse", Uint(self.mspan_inuse)),
            ("mspan_sys", Uint(self.mspan_sys)),
            ("mcache_inuse", Uint(self.mcache_inuse)),
            ("mcache_sys", Uint(self.mcache_sys)),
            ("buck_hash_sys", Uint(self.buck_hash_sys)),
            ("gc_sys", Uint(self.gc_sys)),
            ("other_sys", Uint(self.other_sys)),
            ("next_gc", Uint(self.next_gc)),
            ("last_gc", Uint(self.last_gc)),
            ("pause_total_ns", Uint(self.pause_total_ns)),
            ("pause_ns", Array(self.pause_ns.len())),
            ("pause_end", Array(self.pause_end.len())),
            ("num_gc", Uint(self.num_gc as u64)),
            ("num_forced_gc", Uint(self.num_forced_gc as u64)),
            ("gc_cpu_fraction", Float(self.gc_cpu_fraction)),
            ("enable_gc", Bool(self.enable_gc)),
            ("debug_gc", Bool(self.debug_gc)),
            ("by_size", Array(self.by_size.len())),
        ]
    }

    /// Checks every structural invariant of the report
    ///
    /// All violations are collected into one fault message.
    pub fn check_invariants(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.sys != self.region_total() {
            problems.push(format!(
                "sys {} != region sum {} (heap {} stack {} span {} cache {} buckhash {} gc {} other {})",
                self.sys,
                self.region_total(),
                self.heap_sys,
                self.stack_sys,
                self.mspan_sys,
                self.mcache_sys,
                self.buck_hash_sys,
                self.gc_sys,
                self.other_sys
            ));
        }
        if self.heap_idle.checked_add(self.heap_inuse) != Some(self.heap_sys) {
            problems.push(format!(
                "heap_idle {} + heap_inuse {} != heap_sys {}",
                self.heap_idle, self.heap_inuse, self.heap_sys
            ));
        }
        if self.heap_released > self.heap_idle {
            problems.push(format!(
                "heap_released {} > heap_idle {}",
                self.heap_released, self.heap_idle
            ));
        }
        if self.heap_alloc > self.heap_inuse {
            problems.push(format!(
                "heap_alloc {} > heap_inuse {}",
                self.heap_alloc, self.heap_inuse
            ));
        }
        if self.frees > self.mallocs {
            problems.push(format!("frees {} > mallocs {}", self.frees, self.mallocs));
        }
        if self.heap_objects != self.mallocs - self.frees.min(self.mallocs) {
            problems.push(format!(
                "heap_objects {} != mallocs {} - frees {}",
                self.heap_objects, self.mallocs, self.frees
            ));
        }
        if self.num_forced_gc > self.num_gc {
            problems.push(format!(
                "num_forced_gc {} > num_gc {}",
                self.num_forced_gc, self.num_gc
            ));
        }

        let bounded: [(&str, u64, u64); 8] = [
            ("alloc", self.alloc, COUNTER_CEILING),
            ("total_alloc", self.total_alloc, CUMULATIVE_CEILING),
            ("sys", self.sys, COUNTER_CEILING),
            ("mallocs", self.mallocs, COUNTER_CEILING),
            ("frees", self.frees, COUNTER_CEILING),
            ("lookups", self.lookups, COUNTER_CEILING),
            ("pause_total_ns", self.pause_total_ns, CUMULATIVE_CEILING),
            ("num_gc", self.num_gc as u64, GC_COUNT_CEILING),
        ];
        for (name, value, ceiling) in bounded {
            if value >= ceiling {
                problems.push(format!("{} = {} is insanely high (overflow?)", name, value));
            }
        }

        self.check_pause_history(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(consistency_fault(&problems.join("; ")))
        }
    }

    fn check_pause_history(&self, problems: &mut Vec<String>) {
        let cap = self.pause_ns.len();
        if cap == 0 || self.pause_end.len() != cap {
            problems.push(format!(
                "pause arrays have lengths {} and {}",
                self.pause_ns.len(),
                self.pause_end.len()
            ));
            return;
        }

        let num_gc = self.num_gc as usize;
        if num_gc > 0 {
            let last = self.pause_end[(num_gc - 1) % cap];
            if self.last_gc != last {
                problems.push(format!("last_gc {} != last pause_end {}", self.last_gc, last));
            }
        } else if self.last_gc != 0 {
            problems.push(format!("last_gc {} without any pause", self.last_gc));
        }

        let retained: u64 = self.pause_ns.iter().fold(0u64, |acc, &ns| acc.saturating_add(ns));
        if num_gc <= cap {
            if self.pause_total_ns != retained {
                problems.push(format!(
                    "pause_total_ns {} != sum pause_ns {}",
                    self.pause_total_ns, retained
                ));
            }
            for i in num_gc..cap {
                if self.pause_ns[i] != 0 || self.pause_end[i] != 0 {
                    problems.push(format!(
                        "unwritten pause slot {} holds ({}, {})",
                        i, self.pause_ns[i], self.pause_end[i]
                    ));
                }
            }
        } else if self.pause_total_ns < retained {
            problems.push(format!(
                "pause_total_ns {} < sum pause_ns {}",
                self.pause_total_ns, retained
            ));
        }
    }
}

impl fmt::Display for MemStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory Statistics:")?;
        writeln!(f, "  Alloc:        {} bytes ({} objects)", self.alloc, self.heap_objects)?;
        writeln!(f, "  TotalAlloc:   {} bytes", self.total_alloc)?;
        writeln!(f, "  Sys:          {} bytes", self.sys)?;
        writeln!(f, "  Mallocs:      {}", self.mallocs)?;
        writeln!(f, "  Frees:        {}", self.frees)?;
        writeln!(
            f,
            "  Heap:         sys {} idle {} inuse {} released {}",
            self.heap_sys, self.heap_idle, self.heap_inuse, self.heap_released
        )?;
        writeln!(f, "  Stack:        sys {} inuse {}", self.stack_sys, self.stack_inuse)?;
        writeln!(f, "  MSpan:        sys {} inuse {}", self.mspan_sys, self.mspan_inuse)?;
        writeln!(f, "  MCache:       sys {} inuse {}", self.mcache_sys, self.mcache_inuse)?;
        writeln!(
            f,
            "  Other:        buckhash {} gc {} other {}",
            self.buck_hash_sys, self.gc_sys, self.other_sys
        )?;
        writeln!(f, "  NextGC:       {} bytes", self.next_gc)?;
        writeln!(
            f,
            "  GC:           {} cycles ({} forced), {} ns paused",
            self.num_gc, self.num_forced_gc, self.pause_total_ns
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> MemStats {
        MemStats {
            alloc: 24,
            total_alloc: 40,
            sys: 1000,
            lookups: 2,
            mallocs: 5,
            frees: 2,
            heap_alloc: 24,
            heap_sys: 600,
            heap_idle: 568,
            heap_inuse: 32,
            heap_released: 0,
            heap_objects: 3,
            stack_inuse: 100,
            stack_sys: 100,
            mspan_inuse: 50,
            mspan_sys: 50,
            mcache_inuse: 50,
            mcache_sys: 50,
            buck_hash_sys: 100,
            gc_sys: 50,
            other_sys: 50,
            next_gc: 4096,
            last_gc: 300,
            pause_total_ns: 30,
            pause_ns: vec![15, 10],
            pause_end: vec![300, 200],
            num_gc: 3,
            num_forced_gc: 1,
            gc_cpu_fraction: 0.0,
            enable_gc: true,
            debug_gc: false,
            by_size: Vec::new(),
        }
    }

    #[test]
    fn test_sample_is_consistent() {
        assert_eq!(sample().check_invariants(), Ok(()));
    }

    #[test]
    fn test_detects_bad_sys() {
        let mut stats = sample();
        stats.sys += 1;
        let err = stats.check_invariants().unwrap_err();
        assert!(err.is_consistency_fault());
    }

    #[test]
    fn test_detects_bad_heap_partition() {
        let mut stats = sample();
        stats.heap_idle -= 8;
        assert!(stats.check_invariants().is_err());
    }

    #[test]
    fn test_detects_forced_above_total() {
        let mut stats = sample();
        stats.num_forced_gc = 4;
        assert!(stats.check_invariants().is_err());
    }

    #[test]
    fn test_detects_stale_last_gc() {
        let mut stats = sample();
        stats.last_gc = 200;
        assert!(stats.check_invariants().is_err());
    }

    #[test]
    fn test_exact_pause_total_before_wrap() {
        let mut stats = sample();
        stats.num_gc = 1;
        stats.num_forced_gc = 0;
        stats.pause_ns = vec![15, 0];
        stats.pause_end = vec![300, 0];
        stats.pause_total_ns = 15;
        assert_eq!(stats.check_invariants(), Ok(()));

        stats.pause_total_ns = 16;
        assert!(stats.check_invariants().is_err());

        stats.pause_total_ns = 15;
        stats.pause_end[1] = 7;
        assert!(stats.check_invariants().is_err());
    }

    #[test]
    fn test_detects_overflowed_counter() {
        let mut stats = sample();
        stats.mallocs = u64::MAX;
        stats.heap_objects = u64::MAX - 2;
        let err = stats.check_invariants().unwrap_err();
        assert!(alloc::string::ToString::to_string(&err).contains("insanely high"));
    }

    #[test]
    fn test_fields_are_unique() {
        let stats = sample();
        let fields = stats.fields();
        assert_eq!(fields.len(), 32);
        for (i, (name, _)) in fields.iter().enumerate() {
            assert!(fields[i + 1..].iter().all(|(other, _)| other != name), "{}", name);
        }
    }
}
