//! Store benchmarks for arbordb
//!
//! Measures the operations that dominate real workloads: buffered inserts,
//! the commit path (two-pass packing plus file writes), and point reads
//! against committed pages.

use arbordb::Store;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_insert");

    for count in [100u32, 1000].iter() {
        group.throughput(Throughput::Elements(u64::from(*count)));
        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            b.iter_with_setup(Store::in_memory, |mut store| {
                for i in 0..count {
                    let key = format!("key{i:08}");
                    let value = format!("value{i:08}");
                    store.insert(key.as_bytes(), value.as_bytes()).unwrap();
                }
                store
            });
        });
    }

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_commit");

    for count in [100u32, 1000].iter() {
        group.throughput(Throughput::Elements(u64::from(*count)));
        group.bench_with_input(BenchmarkId::new("in_memory", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let mut store = Store::in_memory();
                    for i in 0..count {
                        let key = format!("key{i:08}");
                        store.insert(key.as_bytes(), &[b'v'; 40]).unwrap();
                    }
                    store
                },
                |mut store| {
                    store.commit().unwrap();
                    store
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("on_disk", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let mut store = Store::builder().path(dir.path()).open().unwrap();
                    for i in 0..count {
                        let key = format!("key{i:08}");
                        store.insert(key.as_bytes(), &[b'v'; 40]).unwrap();
                    }
                    (dir, store)
                },
                |(dir, mut store)| {
                    store.commit().unwrap();
                    (dir, store)
                },
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get");

    let count = 1000u32;
    let mut store = Store::in_memory();
    for i in 0..count {
        let key = format!("key{i:08}");
        store.insert(key.as_bytes(), &[b'v'; 40]).unwrap();
    }
    store.commit().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("committed_point_read", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("key{:08}", i % count);
            i = i.wrapping_add(1);
            black_box(store.get(key.as_bytes()).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_commit, bench_get);
criterion_main!(benches);
