//! Performance benchmarks for the reading window.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reading_feed::{
    CompletionGuard, MockGenerator, Placement, Reading, ReadingId, ReadingStore, Timestamp,
};

fn reading(i: usize) -> Reading {
    Reading::new(format!("r{}", i), "s1", "temperature", i as f64, Timestamp(i as i64))
}

fn full_store(capacity: usize) -> ReadingStore {
    let mut store = ReadingStore::with_capacity(capacity).unwrap();
    store.seed((0..capacity).map(reading));
    store
}

/// Steady-state inserts into a full window (every insert evicts)
fn bench_upsert_front(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_front");

    for capacity in [20, 50, 1000] {
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, &cap| {
            let mut store = full_store(cap);
            let mut next = cap;
            b.iter(|| {
                next += 1;
                black_box(store.upsert_front(reading(next)));
            });
        });
    }

    group.finish();
}

/// Updates to readings already in the window
fn bench_upsert_in_place(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_in_place");

    for capacity in [20, 50, 1000] {
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, &cap| {
            let mut store = full_store(cap);
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % cap;
                black_box(store.upsert_in_place(reading(i)));
            });
        });
    }

    group.finish();
}

/// Full snapshot copy, as taken by every render
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for capacity in [20, 50, 1000] {
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, &cap| {
            let store = full_store(cap);
            b.iter(|| black_box(store.snapshot()));
        });
    }

    group.finish();
}

/// Guard bookkeeping for one event and its completion
fn bench_completion_guard(c: &mut Criterion) {
    c.bench_function("guard_begin_accept", |b| {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("r1");
        b.iter(|| {
            let seq = guard.stamp();
            guard.begin_fetch(id.clone(), seq, Placement::InPlace);
            black_box(guard.accept(&id, seq));
        });
    });
}

fn bench_generator(c: &mut Criterion) {
    let sessions: Vec<String> = (0..10).map(|i| format!("session-{}", i)).collect();
    c.bench_function("mock_generate", |b| {
        let mut generator = MockGenerator::default();
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| black_box(generator.generate(&sessions, &mut rng)));
    });
}

criterion_group!(
    benches,
    bench_upsert_front,
    bench_upsert_in_place,
    bench_snapshot,
    bench_completion_guard,
    bench_generator,
);

criterion_main!(benches);
