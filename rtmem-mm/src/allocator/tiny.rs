//! Tiny object allocator
//!
//! Packs several sub-chunk-sized objects into one shared, aligned chunk so
//! that a one-byte object does not pay for a full size-class slot. Each shard
//! owns one current chunk; a request that does not fit it, or that would mix
//! pointer-bearing and pointer-free objects in one chunk, retires the chunk
//! and starts a fresh one. Retired chunks go back to the chunk source once
//! the collector has reclaimed every object in them.

extern crate alloc;

use alloc::vec::Vec;
use core::mem;
use core::ptr::NonNull;

use hashbrown::HashMap;
use rtmem_api::error::{invalid_request, Result};
use rtmem_api::sync::{AtomicU64, Mutex, Ordering};
use rtmem_api::{align_down, align_up, Addr, AllocationRequest, ChunkSource, Count, Size};

/// The chunk a shard is currently filling
#[derive(Debug)]
pub struct TinyChunk {
    base: NonNull<u8>,
    /// Bytes committed so far
    offset: usize,
    has_pointers: bool,
}

impl TinyChunk {
    fn new(base: NonNull<u8>, has_pointers: bool) -> Self {
        Self {
            base,
            offset: 0,
            has_pointers,
        }
    }

    /// Whether `size` bytes at `align` fit after the committed bytes
    fn fits(&self, size: usize, align: usize, needs_pointers: bool, chunk_size: usize) -> bool {
        self.has_pointers == needs_pointers && align_up(self.offset, align) + size <= chunk_size
    }

    fn commit(&mut self, size: usize, align: usize) -> NonNull<u8> {
        let start = align_up(self.offset, align);
        self.offset = start + size;
        // Callers check `fits` first, so start stays inside the chunk.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) }
    }

    /// Base address of the chunk
    pub fn base(&self) -> Addr {
        self.base.as_ptr() as Addr
    }

    /// Committed bytes
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Registry entry of a chunk holding live tiny objects
#[derive(Debug, Clone, Copy)]
struct ChunkRecord {
    live: u32,
    retired: bool,
    has_pointers: bool,
}

/// Snapshot of the chunk containing an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk base address
    pub base: Addr,
    /// Objects not yet reclaimed
    pub live_objects: u32,
    /// No longer any shard's current chunk
    pub retired: bool,
    /// Holds pointer-bearing objects
    pub has_pointers: bool,
}

/// Counters of one tiny size class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeClassStats {
    /// Largest request size of the class
    pub size: u32,
    /// Allocations served
    pub mallocs: Count,
    /// Objects reclaimed
    pub frees: Count,
}

#[derive(Default)]
struct SizeClassCounters {
    mallocs: AtomicU64,
    frees: AtomicU64,
}

/// Tiny allocator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TinyStats {
    /// Objects allocated
    pub mallocs: Count,
    /// Objects reclaimed
    pub frees: Count,
    /// Bytes ever committed
    pub total_bytes: Count,
    /// Bytes committed and not reclaimed
    pub live_bytes: Count,
    /// Address lookups served
    pub lookups: Count,
    /// Chunks obtained from the chunk source
    pub chunks_allocated: Count,
    /// Chunks given back to the chunk source
    pub chunks_released: Count,
    /// Per size class counters
    pub by_size: Vec<SizeClassStats>,
}

impl TinyStats {
    /// Objects allocated and not reclaimed
    pub fn live_objects(&self) -> Count {
        self.mallocs.saturating_sub(self.frees)
    }
}

/// Tiny object allocator
pub struct TinyAllocator {
    chunk_size: usize,
    threshold: usize,
    shards: Vec<Mutex<Option<TinyChunk>>>,
    registry: Mutex<HashMap<Addr, ChunkRecord>>,
    classes: Vec<usize>,
    class_counters: Vec<SizeClassCounters>,
    mallocs: AtomicU64,
    frees: AtomicU64,
    total_bytes: AtomicU64,
    live_bytes: AtomicU64,
    lookups: AtomicU64,
    chunks_allocated: AtomicU64,
    chunks_released: AtomicU64,
}

impl TinyAllocator {
    /// Creates a tiny allocator with `shards` current-chunk slots
    pub fn new(chunk_size: usize, threshold: usize, shards: usize) -> Self {
        debug_assert!(chunk_size.is_power_of_two());
        debug_assert!(threshold <= chunk_size);

        let shard_count = core::cmp::max(1, shards);
        let mut slots = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            slots.push(Mutex::new(None));
        }

        // Size classes are the powers of two up to the threshold.
        let mut classes = Vec::new();
        let mut class = 1;
        while class < threshold {
            classes.push(class);
            class <<= 1;
        }
        classes.push(threshold);
        let class_counters = classes.iter().map(|_| SizeClassCounters::default()).collect();

        Self {
            chunk_size,
            threshold,
            shards: slots,
            registry: Mutex::new(HashMap::new()),
            classes,
            class_counters,
            mallocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            chunks_allocated: AtomicU64::new(0),
            chunks_released: AtomicU64::new(0),
        }
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Largest request served
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Bytes of allocator-owned bookkeeping, for cache region accounting
    pub fn metadata_bytes(&self) -> usize {
        mem::size_of::<Self>()
            + self.shards.len() * mem::size_of::<Mutex<Option<TinyChunk>>>()
            + self.classes.len() * (mem::size_of::<usize>() + mem::size_of::<SizeClassCounters>())
    }

    /// Rejects requests outside the tiny range before touching any state
    pub fn check_request(&self, request: &AllocationRequest) -> Result<()> {
        if request.size > self.threshold {
            return Err(invalid_request("size exceeds tiny threshold"));
        }
        if !request.align.is_power_of_two() {
            return Err(invalid_request("alignment must be a power of two"));
        }
        if request.align > self.chunk_size {
            return Err(invalid_request("alignment must divide the chunk size"));
        }
        Ok(())
    }

    /// Allocates from shard 0
    pub fn allocate(&self, source: &dyn ChunkSource, request: AllocationRequest) -> Result<NonNull<u8>> {
        self.allocate_on(source, 0, request)
    }

    /// Allocates from the given shard; out-of-range shards fall back to the last one
    pub fn allocate_on(
        &self,
        source: &dyn ChunkSource,
        shard: usize,
        request: AllocationRequest,
    ) -> Result<NonNull<u8>> {
        self.check_request(&request)?;
        // Zero-sized objects still take a byte so that addresses stay distinct.
        let size = request.size.max(1);
        let align = request.align;

        let target = shard.min(self.shards.len() - 1);
        let mut slot = self.shards[target].lock();

        let mut chunk = match slot.take() {
            Some(chunk) if chunk.fits(size, align, request.needs_pointers, self.chunk_size) => chunk,
            old => {
                // Obtain the replacement before retiring anything so that a
                // failure leaves the current chunk in place.
                let base = match source.new_chunk(self.chunk_size) {
                    Ok(base) => base,
                    Err(err) => {
                        *slot = old;
                        return Err(err);
                    }
                };
                self.chunks_allocated.fetch_add(1, Ordering::Relaxed);

                let mut registry = self.registry.lock();
                if let Some(old) = old {
                    self.retire(source, &mut registry, old.base());
                }
                registry.insert(
                    base.as_ptr() as Addr,
                    ChunkRecord {
                        live: 0,
                        retired: false,
                        has_pointers: request.needs_pointers,
                    },
                );
                drop(registry);

                crate::mm_trace!(
                    "tiny shard {} rolled over to chunk {:p} (pointers: {})",
                    target,
                    base.as_ptr(),
                    request.needs_pointers
                );
                TinyChunk::new(base, request.needs_pointers)
            }
        };

        let addr = chunk.commit(size, align);
        let chunk_base = chunk.base();
        debug_assert!(chunk.offset() <= self.chunk_size);
        *slot = Some(chunk);

        if let Some(record) = self.registry.lock().get_mut(&chunk_base) {
            record.live += 1;
        }
        drop(slot);

        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.live_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.class_counters[self.class_index(size)]
            .mallocs
            .fetch_add(1, Ordering::Relaxed);

        Ok(addr)
    }

    /// Marks a chunk as no longer current, releasing it if nothing in it is live
    fn retire(&self, source: &dyn ChunkSource, registry: &mut HashMap<Addr, ChunkRecord>, base: Addr) {
        let empty = match registry.get_mut(&base) {
            Some(record) => {
                record.retired = true;
                record.live == 0
            }
            None => false,
        };
        if empty {
            registry.remove(&base);
            self.release(source, base);
        }
    }

    fn release(&self, source: &dyn ChunkSource, base: Addr) {
        if let Some(chunk) = NonNull::new(base as *mut u8) {
            // Every object in the chunk was reclaimed and no shard holds it.
            unsafe { source.release_chunk(chunk, self.chunk_size) };
            self.chunks_released.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reclaims a dead tiny object of `size` bytes at `addr`
    pub fn reclaim(&self, source: &dyn ChunkSource, addr: NonNull<u8>, size: Size) -> Result<()> {
        if size > self.threshold {
            return Err(invalid_request("size exceeds tiny threshold"));
        }
        let size = size.max(1);
        let addr: Addr = addr.as_ptr() as Addr;
        let base = align_down(addr, self.chunk_size);
        match (addr - base).checked_add(size) {
            Some(end) if end <= self.chunk_size => {}
            _ => return Err(invalid_request("object crosses its chunk boundary")),
        }

        let mut registry = self.registry.lock();
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let record = match registry.get_mut(&base) {
            Some(record) if record.live > 0 => record,
            _ => return Err(invalid_request("address is not a live tiny object")),
        };
        record.live -= 1;
        let release = record.live == 0 && record.retired;

        // Live bytes drop before the chunk leaves heap_inuse.
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(size as u64, Ordering::Relaxed);
        self.class_counters[self.class_index(size)]
            .frees
            .fetch_add(1, Ordering::Relaxed);

        if release {
            registry.remove(&base);
            self.release(source, base);
        }
        Ok(())
    }

    /// Finds the chunk containing `addr`
    pub fn lookup(&self, addr: NonNull<u8>) -> Option<ChunkInfo> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let base = align_down(addr.as_ptr() as Addr, self.chunk_size);
        self.registry.lock().get(&base).map(|record| ChunkInfo {
            base,
            live_objects: record.live,
            retired: record.retired,
            has_pointers: record.has_pointers,
        })
    }

    /// Current chunk of a shard as (base, offset, has_pointers)
    pub fn current_chunk(&self, shard: usize) -> Option<(Addr, usize, bool)> {
        let target = shard.min(self.shards.len() - 1);
        self.shards[target]
            .lock()
            .as_ref()
            .map(|chunk| (chunk.base(), chunk.offset(), chunk.has_pointers))
    }

    /// Bytes committed and not reclaimed
    pub fn live_bytes(&self) -> Count {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Reads the allocator counters
    pub fn stats(&self) -> TinyStats {
        // Frees before mallocs, so that frees never exceed mallocs.
        let frees = self.frees.load(Ordering::SeqCst);
        let live_bytes = self.live_bytes.load(Ordering::SeqCst);
        let mallocs = self.mallocs.load(Ordering::SeqCst);
        let total_bytes = self.total_bytes.load(Ordering::SeqCst);

        let by_size = self
            .classes
            .iter()
            .zip(self.class_counters.iter())
            .map(|(&size, counters)| {
                let frees = counters.frees.load(Ordering::SeqCst);
                SizeClassStats {
                    size: size as u32,
                    mallocs: counters.mallocs.load(Ordering::SeqCst),
                    frees,
                }
            })
            .collect();

        TinyStats {
            mallocs,
            frees,
            total_bytes,
            live_bytes,
            lookups: self.lookups.load(Ordering::SeqCst),
            chunks_allocated: self.chunks_allocated.load(Ordering::SeqCst),
            chunks_released: self.chunks_released.load(Ordering::SeqCst),
            by_size,
        }
    }

    fn class_index(&self, size: usize) -> usize {
        self.classes
            .iter()
            .position(|&class| size <= class)
            .unwrap_or(self.classes.len() - 1)
    }
}

// Chunk pointers are only touched under the shard and registry locks
unsafe impl Send for TinyChunk {}
unsafe impl Send for TinyAllocator {}
unsafe impl Sync for TinyAllocator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::heap::ArenaHeap;
    use rtmem_api::Error;

    fn setup() -> (ArenaHeap, TinyAllocator) {
        (ArenaHeap::new(4096, 64 * 4096), TinyAllocator::new(16, 16, 1))
    }

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn test_packs_into_one_chunk() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(1, 1)).unwrap();
        let b = tiny.allocate(&heap, AllocationRequest::noscan(1, 1)).unwrap();
        let c = tiny.allocate(&heap, AllocationRequest::noscan(4, 4)).unwrap();
        assert_eq!(addr(b), addr(a) + 1);
        assert_eq!(addr(c), addr(a) + 4);
        assert_eq!(tiny.stats().chunks_allocated, 1);
    }

    #[test]
    fn test_rolls_over_instead_of_overflowing() {
        let (heap, tiny) = setup();
        let first = tiny.allocate(&heap, AllocationRequest::noscan(10, 1)).unwrap();
        assert_eq!(tiny.current_chunk(0).map(|c| c.1), Some(10));

        let second = tiny.allocate(&heap, AllocationRequest::noscan(9, 1)).unwrap();
        assert_ne!(align_down(addr(first), 16), align_down(addr(second), 16));
        assert_eq!(addr(second) % 16, 0);
        assert_eq!(tiny.current_chunk(0).map(|c| c.1), Some(9));
        assert_eq!(tiny.stats().chunks_allocated, 2);
    }

    #[test]
    fn test_alignment_padding() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(1, 1)).unwrap();
        let b = tiny.allocate(&heap, AllocationRequest::noscan(8, 8)).unwrap();
        assert_eq!(addr(b), addr(a) + 8);
        assert_eq!(addr(b) % 8, 0);
        // Offset 9 rounded to 8 does not leave room for another 8 bytes.
        let c = tiny.allocate(&heap, AllocationRequest::noscan(8, 8)).unwrap();
        assert_eq!(addr(c) % 16, 0);
        assert_ne!(align_down(addr(c), 16), align_down(addr(a), 16));
    }

    #[test]
    fn test_pointer_kinds_never_share_a_chunk() {
        let (heap, tiny) = setup();
        let plain = tiny.allocate(&heap, AllocationRequest::noscan(2, 1)).unwrap();
        let scanned = tiny.allocate(&heap, AllocationRequest::scan(2, 1)).unwrap();
        assert_ne!(align_down(addr(plain), 16), align_down(addr(scanned), 16));
        assert_eq!(tiny.current_chunk(0).map(|c| c.2), Some(true));

        let info = tiny.lookup(scanned).unwrap();
        assert!(info.has_pointers);
        assert!(!info.retired);
        assert!(tiny.lookup(plain).unwrap().retired);
    }

    #[test]
    fn test_zero_sized_objects_are_distinct() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(0, 1)).unwrap();
        let b = tiny.allocate(&heap, AllocationRequest::noscan(0, 1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(align_down(addr(a), 8), align_down(addr(b), 8));
    }

    #[test]
    fn test_invalid_requests_leave_no_state() {
        let (heap, tiny) = setup();
        let bad = [
            AllocationRequest::noscan(17, 1),
            AllocationRequest::noscan(4, 3),
            AllocationRequest::noscan(4, 32),
            AllocationRequest::noscan(4, 0),
        ];
        for request in bad {
            assert!(matches!(tiny.allocate(&heap, request), Err(Error::InvalidRequest(_))));
        }
        assert_eq!(tiny.stats(), TinyAllocator::new(16, 16, 1).stats());
        assert_eq!(heap.usage().heap_sys, 0);
        assert!(tiny.current_chunk(0).is_none());
    }

    #[test]
    fn test_reclaim_releases_retired_chunk() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(8, 8)).unwrap();
        let b = tiny.allocate(&heap, AllocationRequest::noscan(8, 8)).unwrap();
        // Third request retires the full chunk.
        let _c = tiny.allocate(&heap, AllocationRequest::noscan(8, 8)).unwrap();
        assert_eq!(heap.usage().heap_inuse, 32);

        tiny.reclaim(&heap, a, 8).unwrap();
        assert_eq!(heap.usage().heap_inuse, 32);
        tiny.reclaim(&heap, b, 8).unwrap();
        assert_eq!(heap.usage().heap_inuse, 16);
        assert_eq!(heap.usage().free_chunks, 1);

        let stats = tiny.stats();
        assert_eq!(stats.mallocs, 3);
        assert_eq!(stats.frees, 2);
        assert_eq!(stats.live_bytes, 8);
        assert_eq!(stats.chunks_released, 1);
        assert!(tiny.lookup(a).is_none());
    }

    #[test]
    fn test_current_chunk_survives_full_reclaim() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(4, 4)).unwrap();
        tiny.reclaim(&heap, a, 4).unwrap();
        assert_eq!(tiny.stats().chunks_released, 0);
        let b = tiny.allocate(&heap, AllocationRequest::noscan(4, 4)).unwrap();
        assert_eq!(addr(b), addr(a) + 4);
    }

    #[test]
    fn test_reclaim_rejects_unknown_and_double_free() {
        let (heap, tiny) = setup();
        let a = tiny.allocate(&heap, AllocationRequest::noscan(4, 4)).unwrap();
        tiny.reclaim(&heap, a, 4).unwrap();
        assert!(matches!(tiny.reclaim(&heap, a, 4), Err(Error::InvalidRequest(_))));

        let stray = NonNull::new(0x10 as *mut u8).unwrap();
        assert!(matches!(tiny.reclaim(&heap, stray, 1), Err(Error::InvalidRequest(_))));
        assert_eq!(tiny.stats().frees, 1);
    }

    #[test]
    fn test_reclaim_rejects_sizes_outside_tiny_range() {
        let heap = ArenaHeap::new(4096, 4096);
        let tiny = TinyAllocator::new(16, 8, 1);
        tiny.allocate(&heap, AllocationRequest::noscan(1, 1)).unwrap();
        let b = tiny.allocate(&heap, AllocationRequest::noscan(1, 1)).unwrap();
        let before = tiny.stats();

        assert!(matches!(tiny.reclaim(&heap, b, 12), Err(Error::InvalidRequest(_))));
        assert!(matches!(tiny.reclaim(&heap, b, usize::MAX), Err(Error::InvalidRequest(_))));
        // Within the threshold but running past the end of the chunk.
        let end = NonNull::new((addr(b) | 15) as *mut u8).unwrap();
        assert!(matches!(tiny.reclaim(&heap, end, 8), Err(Error::InvalidRequest(_))));

        assert_eq!(tiny.stats(), before);
        assert_eq!(tiny.live_bytes(), 2);
        tiny.reclaim(&heap, b, 1).unwrap();
        assert_eq!(tiny.live_bytes(), 1);
    }

    #[test]
    fn test_shards_fill_separate_chunks() {
        let heap = ArenaHeap::new(4096, 4096);
        let tiny = TinyAllocator::new(16, 16, 4);
        let a = tiny.allocate_on(&heap, 0, AllocationRequest::noscan(1, 1)).unwrap();
        let b = tiny.allocate_on(&heap, 1, AllocationRequest::noscan(1, 1)).unwrap();
        let c = tiny.allocate_on(&heap, 99, AllocationRequest::noscan(1, 1)).unwrap();
        assert_ne!(align_down(addr(a), 16), align_down(addr(b), 16));
        assert_eq!(tiny.current_chunk(3).map(|chunk| chunk.0), Some(align_down(addr(c), 16)));
    }

    #[test]
    fn test_size_classes() {
        let (heap, tiny) = setup();
        tiny.allocate(&heap, AllocationRequest::noscan(3, 1)).unwrap();
        tiny.allocate(&heap, AllocationRequest::noscan(16, 16)).unwrap();
        let by_size = tiny.stats().by_size;
        let sizes: Vec<u32> = by_size.iter().map(|class| class.size).collect();
        assert_eq!(sizes, [1, 2, 4, 8, 16]);
        assert_eq!(by_size[2].mallocs, 1);
        assert_eq!(by_size[4].mallocs, 1);
    }
}
