use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use vermilion_graphics::{ArenaDescriptor, ArenaPointer, ArenaUsage, NullBackend, RenderInstance};

fn test_arena(size: u64, allow_resize: bool) -> Arc<vermilion_graphics::MemoryArena> {
    let instance = RenderInstance::with_backend(Arc::new(NullBackend::new()));
    instance
        .create_arena(
            &ArenaDescriptor::new(size, ArenaUsage::UNIFORM).with_resize(allow_resize),
        )
        .unwrap()
}

// ---------------------------------------------------------------------------
// Allocate / release churn
// ---------------------------------------------------------------------------

fn bench_allocate_release_churn(c: &mut Criterion) {
    let arena = test_arena(1 << 20, false);
    c.bench_function("allocate_release_churn_64", |b| {
        b.iter(|| {
            let ptr = arena.allocate(black_box(64));
            arena.release(black_box(ptr));
        });
    });
}

fn bench_allocate_batch_then_release(c: &mut Criterion) {
    let arena = test_arena(1 << 20, false);
    c.bench_function("allocate_64x256_release_all", |b| {
        b.iter(|| {
            let ptrs: Vec<ArenaPointer> =
                (0..256).map(|_| arena.allocate(black_box(64))).collect();
            for ptr in ptrs {
                arena.release(ptr);
            }
        });
    });
}

// ---------------------------------------------------------------------------
// First-fit over a fragmented free list
// ---------------------------------------------------------------------------

fn bench_first_fit_fragmented(c: &mut Criterion) {
    let arena = test_arena(1 << 20, false);

    // Allocate small blocks and release every other one, leaving a long
    // free list of 64-byte holes before the tail region.
    let ptrs: Vec<ArenaPointer> = (0..1024).map(|_| arena.allocate(64)).collect();
    for ptr in ptrs.iter().step_by(2) {
        arena.release(*ptr);
    }

    c.bench_function("first_fit_1024_holes_miss", |b| {
        b.iter(|| {
            // 128 bytes never fits a 64-byte hole; the scan walks every
            // hole and lands in the tail region.
            let ptr = arena.allocate(black_box(128));
            arena.release(ptr);
        });
    });
}

// ---------------------------------------------------------------------------
// Update and dirty tracking
// ---------------------------------------------------------------------------

fn bench_update_same_range(c: &mut Criterion) {
    let arena = test_arena(1 << 16, false);
    let ptr = arena.allocate(256);
    let data = [0u8; 256];

    c.bench_function("update_256_deduped", |b| {
        b.iter(|| {
            arena.update(black_box(ptr), black_box(&data));
        });
    });
}

fn bench_update_fresh_ranges(c: &mut Criterion) {
    let arena = test_arena(1 << 16, false);
    let ptrs: Vec<ArenaPointer> = (0..64).map(|_| arena.allocate(64)).collect();
    let data = [0u8; 64];

    c.bench_function("update_64_ranges_then_drain", |b| {
        b.iter(|| {
            for ptr in &ptrs {
                arena.update(black_box(*ptr), black_box(&data));
            }
            black_box(arena.take_dirty());
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_release_churn,
    bench_allocate_batch_then_release,
    bench_first_fit_fragmented,
    bench_update_same_range,
    bench_update_fresh_ranges,
);
criterion_main!(benches);
