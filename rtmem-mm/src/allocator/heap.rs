//! Arena heap
//!
//! Default general allocator behind the tiny allocator. Memory is reserved in
//! fixed-size zeroed arenas and carved into power-of-two chunks aligned to
//! their own size. Released chunks are zeroed and parked on a per-size free
//! list. The heap also keeps the byte accounting for every memory region the
//! statistics report exposes.

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::vec::Vec;
use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};

use hashbrown::HashMap;
use rtmem_api::error::{invalid_request, out_of_memory, Result};
use rtmem_api::sync::{AtomicUsize, Mutex, Ordering};
use rtmem_api::{align_up, ChunkSource, Size};

/// Alignment of every arena
pub const ARENA_ALIGN: usize = 4096;

/// Heap word size used for collector bitmap accounting
const WORD_SIZE: usize = mem::size_of::<usize>();

/// Memory region tracked by the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Object heap arenas
    Heap,
    /// Task stacks
    Stack,
    /// Span descriptors
    Span,
    /// Per-shard allocation caches
    Cache,
    /// Profiling bucket hash table
    BucketHash,
    /// Collector bookkeeping
    Collector,
    /// Everything else
    Other,
}

impl Region {
    /// All regions, in report order
    pub const ALL: [Region; 7] = [
        Region::Heap,
        Region::Stack,
        Region::Span,
        Region::Cache,
        Region::BucketHash,
        Region::Collector,
        Region::Other,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Reserved and in-use bytes of one region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionUsage {
    /// Bytes obtained from the system
    pub sys: usize,
    /// Bytes actually in use
    pub inuse: usize,
}

/// Heap arena counters, read under one lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapUsage {
    /// Bytes of reserved arenas
    pub heap_sys: usize,
    /// Bytes handed out as chunks
    pub heap_inuse: usize,
    /// Bytes returned to the system
    pub heap_released: usize,
    /// Number of arenas
    pub arenas: usize,
    /// Chunks parked on free lists
    pub free_chunks: usize,
}

impl HeapUsage {
    /// Bytes reserved but not handed out
    pub fn heap_idle(&self) -> usize {
        self.heap_sys.saturating_sub(self.heap_inuse)
    }
}

/// One reserved arena
struct Arena {
    base: NonNull<u8>,
    size: usize,
    /// Bump offset of the next uncarved byte
    carved: usize,
}

impl Arena {
    /// Carves `size` bytes aligned to `size`, if they fit
    fn carve(&mut self, size: usize) -> Option<NonNull<u8>> {
        let base = self.base.as_ptr() as usize;
        let start = align_up(base + self.carved, size) - base;
        if start + size > self.size {
            return None;
        }
        self.carved = start + size;
        // start < self.size, so the pointer stays inside the arena.
        NonNull::new(unsafe { self.base.as_ptr().add(start) })
    }
}

struct HeapInner {
    arenas: Vec<Arena>,
    free_chunks: HashMap<usize, Vec<NonNull<u8>>>,
    heap_sys: usize,
    heap_inuse: usize,
}

/// Arena-backed general allocator
pub struct ArenaHeap {
    arena_size: usize,
    max_heap_bytes: usize,
    inner: Mutex<HeapInner>,
    region_sys: [AtomicUsize; 7],
    region_inuse: [AtomicUsize; 7],
}

impl ArenaHeap {
    /// Creates an empty heap; arenas are reserved on first use
    pub fn new(arena_size: usize, max_heap_bytes: usize) -> Self {
        debug_assert!(arena_size.is_power_of_two());
        Self {
            arena_size,
            max_heap_bytes,
            inner: Mutex::new(HeapInner {
                arenas: Vec::new(),
                free_chunks: HashMap::new(),
                heap_sys: 0,
                heap_inuse: 0,
            }),
            region_sys: Default::default(),
            region_inuse: Default::default(),
        }
    }

    /// Arena size in bytes
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Allocates a zeroed chunk of `size` bytes aligned to `size`
    pub fn alloc_chunk(&self, size: Size) -> Result<NonNull<u8>> {
        if !size.is_power_of_two() || size > self.arena_size.min(ARENA_ALIGN) {
            return Err(invalid_request("chunk size must be a power of two no larger than 4096"));
        }

        let mut inner = self.inner.lock();

        if let Some(chunk) = inner.free_chunks.get_mut(&size).and_then(|list| list.pop()) {
            inner.heap_inuse += size;
            return Ok(chunk);
        }

        if let Some(chunk) = inner.arenas.last_mut().and_then(|arena| arena.carve(size)) {
            inner.heap_inuse += size;
            return Ok(chunk);
        }

        let mut arena = self.grow(&mut inner)?;
        let chunk = arena.carve(size).ok_or_else(out_of_memory)?;
        inner.arenas.push(arena);
        inner.heap_inuse += size;
        Ok(chunk)
    }

    /// Returns a chunk to the free list, zeroing it for the next user
    ///
    /// # Safety
    /// `chunk` must come from `alloc_chunk` on this heap with the same `size`
    /// and must not be used afterwards.
    pub unsafe fn free_chunk(&self, chunk: NonNull<u8>, size: Size) {
        unsafe { ptr::write_bytes(chunk.as_ptr(), 0, size) };
        let mut inner = self.inner.lock();
        inner.heap_inuse = inner.heap_inuse.saturating_sub(size);
        inner.free_chunks.entry(size).or_default().push(chunk);
    }

    /// Reserves a fresh arena, charging span and collector metadata
    fn grow(&self, inner: &mut HeapInner) -> Result<Arena> {
        if inner.heap_sys + self.arena_size > self.max_heap_bytes {
            crate::mm_warn!(
                "heap limit reached: {} of {} bytes reserved",
                inner.heap_sys,
                self.max_heap_bytes
            );
            return Err(out_of_memory());
        }

        let layout = Layout::from_size_align(self.arena_size, ARENA_ALIGN)
            .map_err(|_| out_of_memory())?;
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or_else(out_of_memory)?;

        inner.heap_sys += self.arena_size;
        let span = mem::size_of::<Arena>();
        self.reserve_region(Region::Span, span, span);
        let bitmap = self.arena_size / WORD_SIZE / 8;
        self.reserve_region(Region::Collector, bitmap, bitmap);

        crate::mm_debug!(
            "reserved arena #{} at {:p}, heap_sys now {}",
            inner.arenas.len(),
            base.as_ptr(),
            inner.heap_sys
        );

        Ok(Arena {
            base,
            size: self.arena_size,
            carved: 0,
        })
    }

    /// Accounts `sys` reserved and `inuse` used bytes for a metadata region
    pub fn reserve_region(&self, region: Region, sys: usize, inuse: usize) {
        debug_assert!(region != Region::Heap, "heap bytes are tracked by arenas");
        debug_assert!(inuse <= sys);
        self.region_sys[region.index()].fetch_add(sys, Ordering::SeqCst);
        self.region_inuse[region.index()].fetch_add(inuse, Ordering::SeqCst);
    }

    /// Reads the counters of one region
    pub fn region_usage(&self, region: Region) -> RegionUsage {
        if region == Region::Heap {
            let usage = self.usage();
            return RegionUsage {
                sys: usage.heap_sys,
                inuse: usage.heap_inuse,
            };
        }
        RegionUsage {
            sys: self.region_sys[region.index()].load(Ordering::SeqCst),
            inuse: self.region_inuse[region.index()].load(Ordering::SeqCst),
        }
    }

    /// Reads the arena counters consistently
    pub fn usage(&self) -> HeapUsage {
        let inner = self.inner.lock();
        HeapUsage {
            heap_sys: inner.heap_sys,
            heap_inuse: inner.heap_inuse,
            heap_released: 0,
            arenas: inner.arenas.len(),
            free_chunks: inner.free_chunks.values().map(Vec::len).sum(),
        }
    }
}

impl ChunkSource for ArenaHeap {
    fn new_chunk(&self, size: Size) -> Result<NonNull<u8>> {
        self.alloc_chunk(size)
    }

    unsafe fn release_chunk(&self, chunk: NonNull<u8>, size: Size) {
        unsafe { self.free_chunk(chunk, size) }
    }
}

impl Drop for ArenaHeap {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for arena in inner.arenas.drain(..) {
            if let Ok(layout) = Layout::from_size_align(arena.size, ARENA_ALIGN) {
                unsafe { dealloc(arena.base.as_ptr(), layout) };
            }
        }
    }
}

// Arena pointers are only touched under the heap lock
unsafe impl Send for ArenaHeap {}
unsafe impl Sync for ArenaHeap {}

#[cfg(test)]
mod tests {
    use super::*;
    use rtmem_api::Error;

    #[test]
    fn test_chunks_are_aligned_and_zeroed() {
        let heap = ArenaHeap::new(4096, 16 * 4096);
        for _ in 0..10 {
            let chunk = heap.alloc_chunk(16).unwrap();
            assert_eq!(chunk.as_ptr() as usize % 16, 0);
            let bytes = unsafe { core::slice::from_raw_parts(chunk.as_ptr(), 16) };
            assert!(bytes.iter().all(|&b| b == 0));
        }
        let usage = heap.usage();
        assert_eq!(usage.heap_sys, 4096);
        assert_eq!(usage.heap_inuse, 160);
        assert_eq!(usage.heap_idle() + usage.heap_inuse, usage.heap_sys);
    }

    #[test]
    fn test_free_list_reuse_zeroes() {
        let heap = ArenaHeap::new(4096, 4096);
        let chunk = heap.alloc_chunk(16).unwrap();
        unsafe {
            ptr::write_bytes(chunk.as_ptr(), 0xAB, 16);
            heap.free_chunk(chunk, 16);
        }
        assert_eq!(heap.usage().heap_inuse, 0);
        assert_eq!(heap.usage().free_chunks, 1);

        let again = heap.alloc_chunk(16).unwrap();
        assert_eq!(again, chunk);
        let bytes = unsafe { core::slice::from_raw_parts(again.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_limit_is_out_of_memory() {
        let heap = ArenaHeap::new(4096, 4096);
        for _ in 0..(4096 / 64) {
            heap.alloc_chunk(64).unwrap();
        }
        assert_eq!(heap.alloc_chunk(64), Err(Error::OutOfMemory));
        // Failure leaves the accounting untouched.
        assert_eq!(heap.usage().heap_inuse, 4096);
        assert_eq!(heap.usage().arenas, 1);
    }

    #[test]
    fn test_grow_charges_metadata() {
        let heap = ArenaHeap::new(4096, 8192);
        heap.alloc_chunk(4096).unwrap();
        heap.alloc_chunk(4096).unwrap();
        assert_eq!(heap.usage().arenas, 2);
        assert_eq!(heap.region_usage(Region::Span).sys, 2 * mem::size_of::<Arena>());
        assert_eq!(heap.region_usage(Region::Collector).sys, 2 * 4096 / WORD_SIZE / 8);
        assert_eq!(heap.region_usage(Region::Heap).sys, 8192);
    }

    #[test]
    fn test_rejects_odd_chunk_sizes() {
        let heap = ArenaHeap::new(4096, 4096);
        assert!(matches!(heap.alloc_chunk(24), Err(Error::InvalidRequest(_))));
        assert!(matches!(heap.alloc_chunk(8192), Err(Error::InvalidRequest(_))));
        assert_eq!(heap.usage().heap_sys, 0);
    }
}
