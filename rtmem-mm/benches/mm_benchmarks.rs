//! Memory management benchmarks

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rtmem_mm::{MemConfig, MemContext, PauseEvent};

fn context() -> MemContext {
    MemContext::new(MemConfig::default().with_validation(false)).unwrap()
}

// Each object is reclaimed right away so retired chunks go back to the free list.
fn bench_tiny_allocation(c: &mut Criterion) {
    let ctx = context();
    c.bench_function("tiny_alloc_8", |b| {
        b.iter(|| {
            let obj = ctx.tiny_alloc(black_box(8), 8, false).unwrap();
            ctx.reclaim(obj, 8).unwrap();
        })
    });
    c.bench_function("tiny_alloc_16", |b| {
        b.iter(|| {
            let obj = ctx.tiny_alloc(black_box(16), 16, false).unwrap();
            ctx.reclaim(obj, 16).unwrap();
        })
    });
}

fn bench_pointer_allocation(c: &mut Criterion) {
    let ctx = context();
    let mut scan = false;
    c.bench_function("tiny_alloc_alternating_pointers", |b| {
        b.iter(|| {
            scan = !scan;
            let obj = ctx.tiny_alloc(black_box(4), 4, scan).unwrap();
            ctx.reclaim(obj, 4).unwrap();
        })
    });
}

fn bench_stats_snapshot(c: &mut Criterion) {
    let ctx = context();
    for size in 1..=16 {
        ctx.tiny_alloc(size, 1, size % 2 == 0).unwrap();
    }
    ctx.collect(true).unwrap();
    c.bench_function("read_mem_stats", |b| b.iter(|| black_box(ctx.read_mem_stats(false).unwrap())));
}

fn bench_pause_recording(c: &mut Criterion) {
    let ctx = context();
    let mut end = 0u64;
    c.bench_function("record_pause", |b| {
        b.iter(|| {
            end += 1_000;
            ctx.record_pause(black_box(PauseEvent::new(500, end, false)));
        })
    });
}

criterion_group!(
    benches,
    bench_tiny_allocation,
    bench_pointer_allocation,
    bench_stats_snapshot,
    bench_pause_recording
);

criterion_main!(benches);
