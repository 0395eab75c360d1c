//! Benchmarks for status derivation and the query pass hot path.

use std::sync::Arc;

use cachebind_core::hooks::status::derive_query_status;
use cachebind_core::hooks::{QueryHooks, QueryOptions};
use cachebind_core::reactive::Runtime;
use cachebind_core::store::memory::MemoryQuery;
use cachebind_core::store::{CacheEntry, QueryStatus};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn entry(status: QueryStatus, len: usize) -> CacheEntry<Vec<u64>, String> {
    CacheEntry {
        status,
        data: (len > 0).then(|| (0..len as u64).collect()),
        fulfilled_timestamp: Some(0),
        ..CacheEntry::uninitialized()
    }
}

/// Benchmark the pure derivation with carried data of varying size
fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_query_status");

    for len in [0, 16, 1024] {
        let pending = entry(QueryStatus::Pending, 0);
        let last = derive_query_status(&entry(QueryStatus::Fulfilled, len), None);

        group.bench_with_input(BenchmarkId::new("carry_forward", len), &len, |b, _| {
            b.iter(|| black_box(derive_query_status(black_box(&pending), Some(&last))));
        });
    }

    group.finish();
}

/// Benchmark a full query pass over an unchanged fulfilled entry
fn bench_query_pass(c: &mut Criterion) {
    let runtime = Runtime::new();
    let store = Arc::new(MemoryQuery::<u32, Vec<u64>, String>::new("items").with_runtime(&runtime));
    let hooks = QueryHooks::new(store.clone(), &runtime);
    let mut query = hooks.query();
    let options = QueryOptions::default();

    runtime.pass(|pass| query.evaluate(pass, 1, &options));
    runtime.flush().unwrap();
    store.fulfill(&1, (0..256).collect()).unwrap();

    c.bench_function("query_pass_unchanged", |b| {
        b.iter(|| {
            let result = runtime.pass(|pass| query.evaluate(pass, black_box(1), &options));
            runtime.flush().unwrap();
            black_box(result.status)
        });
    });
}

criterion_group!(benches, bench_derive, bench_query_pass);
criterion_main!(benches);
