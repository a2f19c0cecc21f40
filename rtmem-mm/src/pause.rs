//! Pause history ring
//!
//! Fixed-capacity circular log of collection pauses. Pause `n` (counting from
//! zero) lands in slot `n mod C`; the running total keeps every duration ever
//! recorded, so once the ring wraps it is larger than the sum of what is still
//! retained.
//!
//! Writers serialise on a lock. Readers never lock: each write is bracketed by
//! a sequence counter that is odd while a write is in flight, and a reader
//! retries until it sees the same even sequence before and after copying the
//! counters and both arrays. A slot update is therefore only ever observed
//! together with the counter increment that publishes it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;

use rtmem_api::sync::{fence, AtomicU64, Mutex, Ordering};
use rtmem_api::{Nanoseconds, PauseEvent};

/// Point-in-time copy of the pause ring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseHistory {
    /// Pause durations by slot
    pub pause_ns: Vec<u64>,
    /// Pause end timestamps by slot
    pub pause_end: Vec<u64>,
    /// Pauses ever recorded
    pub num_gc: u64,
    /// Pauses that were explicitly requested
    pub num_forced_gc: u64,
    /// Sum of every duration ever recorded
    pub pause_total_ns: u64,
}

impl PauseHistory {
    /// Ring capacity
    pub fn capacity(&self) -> usize {
        self.pause_ns.len()
    }

    /// Number of slots holding a recorded pause
    pub fn retained(&self) -> usize {
        core::cmp::min(self.num_gc, self.capacity() as u64) as usize
    }

    /// Slot of the most recent pause
    pub fn last_slot(&self) -> Option<usize> {
        if self.num_gc == 0 || self.capacity() == 0 {
            return None;
        }
        Some(((self.num_gc - 1) % self.capacity() as u64) as usize)
    }

    /// End timestamp of the most recent pause, zero before the first one
    pub fn last_pause_end(&self) -> u64 {
        self.last_slot().map_or(0, |slot| self.pause_end[slot])
    }

    /// Sum of the retained durations
    pub fn retained_total(&self) -> u64 {
        self.pause_ns.iter().fold(0u64, |acc, &ns| acc.saturating_add(ns))
    }

    /// Retained pauses from oldest to newest
    pub fn chronological(&self) -> Vec<(u64, u64)> {
        let cap = self.capacity();
        let retained = self.retained();
        let first = (self.num_gc as usize).wrapping_sub(retained);
        (0..retained)
            .map(|i| {
                let slot = first.wrapping_add(i) % cap;
                (self.pause_ns[slot], self.pause_end[slot])
            })
            .collect()
    }
}

/// Ring buffer of pause durations and end timestamps
pub struct PauseRing {
    durations: Box<[AtomicU64]>,
    ends: Box<[AtomicU64]>,
    mask: usize,
    seq: AtomicU64,
    total: AtomicU64,
    forced: AtomicU64,
    pause_total_ns: AtomicU64,
    writer: Mutex<()>,
}

impl PauseRing {
    /// Creates an empty ring; `capacity` must be a power of two
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let capacity = capacity.max(1);
        Self {
            durations: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            ends: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity - 1,
            seq: AtomicU64::new(0),
            total: AtomicU64::new(0),
            forced: AtomicU64::new(0),
            pause_total_ns: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Ring capacity
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Bytes occupied by the ring, for region accounting
    pub fn footprint(&self) -> usize {
        mem::size_of::<Self>() + 2 * self.capacity() * mem::size_of::<AtomicU64>()
    }

    /// Records one completed pause
    pub fn record_pause(&self, duration_ns: Nanoseconds, end_ns: Nanoseconds, forced: bool) {
        let _writer = self.writer.lock();

        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let n = self.total.load(Ordering::Relaxed);
        let slot = (n as usize) & self.mask;
        self.durations[slot].store(duration_ns, Ordering::Relaxed);
        self.ends[slot].store(end_ns, Ordering::Relaxed);
        self.pause_total_ns.fetch_add(duration_ns, Ordering::Relaxed);
        if forced {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        self.total.store(n + 1, Ordering::Release);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Records a pause event
    pub fn record(&self, event: PauseEvent) {
        self.record_pause(event.duration_ns, event.end_ns, event.forced);
    }

    /// Pauses recorded so far
    pub fn total_pauses(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// End timestamp of the most recent pause
    pub fn last_pause_end(&self) -> u64 {
        self.snapshot().last_pause_end()
    }

    /// Copies the ring without blocking writers
    pub fn snapshot(&self) -> PauseHistory {
        let cap = self.capacity();
        let mut history = PauseHistory {
            pause_ns: alloc::vec![0; cap],
            pause_end: alloc::vec![0; cap],
            ..PauseHistory::default()
        };

        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                core::hint::spin_loop();
                continue;
            }

            history.num_gc = self.total.load(Ordering::Acquire);
            history.num_forced_gc = self.forced.load(Ordering::Relaxed);
            history.pause_total_ns = self.pause_total_ns.load(Ordering::Relaxed);
            for slot in 0..cap {
                history.pause_ns[slot] = self.durations[slot].load(Ordering::Relaxed);
                history.pause_end[slot] = self.ends[slot].load(Ordering::Relaxed);
            }

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return history;
            }
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let ring = PauseRing::new(4);
        let history = ring.snapshot();
        assert_eq!(history.num_gc, 0);
        assert_eq!(history.retained(), 0);
        assert_eq!(history.last_pause_end(), 0);
        assert_eq!(history.pause_ns, [0, 0, 0, 0]);
        assert!(history.chronological().is_empty());
    }

    #[test]
    fn test_wraparound_scenario() {
        let ring = PauseRing::new(2);
        ring.record_pause(5, 100, false);
        ring.record_pause(10, 200, true);
        ring.record_pause(15, 300, false);

        let history = ring.snapshot();
        assert_eq!(history.num_gc, 3);
        assert_eq!(history.pause_total_ns, 30);
        assert_eq!(history.pause_ns[(history.num_gc % 2) as usize], 10);
        assert_eq!(history.pause_ns[((history.num_gc - 1) % 2) as usize], 15);
        assert_eq!(history.pause_end[((history.num_gc - 1) % 2) as usize], 300);
        assert_eq!(history.last_pause_end(), 300);
        assert!(history.pause_total_ns >= history.retained_total());
        assert_eq!(history.retained_total(), 25);
        assert_eq!(history.num_forced_gc, 1);
        assert_eq!(history.chronological(), [(10, 200), (15, 300)]);
    }

    #[test]
    fn test_exact_total_before_wrap() {
        let ring = PauseRing::new(8);
        for i in 1..=5u64 {
            ring.record(PauseEvent::new(i * 7, i * 1000, i % 2 == 0));
        }
        let history = ring.snapshot();
        assert_eq!(history.pause_total_ns, history.retained_total());
        assert!(history.pause_ns[5..].iter().all(|&ns| ns == 0));
        assert!(history.pause_end[5..].iter().all(|&end| end == 0));
        assert_eq!(history.num_forced_gc, 2);
        assert_eq!(ring.last_pause_end(), 5000);
    }

    #[test]
    fn test_footprint_counts_both_arrays() {
        let ring = PauseRing::new(256);
        assert!(ring.footprint() >= 2 * 256 * 8);
        assert_eq!(ring.capacity(), 256);
    }
}
