//! Persistent sorted map benchmarks
//!
//! ## Groups
//!
//! - `sorted_map_insert/*`: building a map key by key, across the
//!   array-to-tree promotion point
//! - `sorted_map_get/*`: lookups in array- and tree-backed maps
//! - `sorted_map_share`: inserting an unchanged value (shares storage)
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench sorted_map
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docsync::SortedMap;

/// Fixed seed for deterministic key order.
const BENCH_SEED: u64 = 0xDEADBEEF_CAFEBABE;

/// Knuth MMIX LCG, used to shuffle keys without allocating in timed loops
fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn shuffled_keys(count: usize) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..count as u64).collect();
    let mut state = BENCH_SEED;
    for i in (1..keys.len()).rev() {
        let j = (lcg_next(&mut state) as usize) % (i + 1);
        keys.swap(i, j);
    }
    keys
}

fn build(keys: &[u64]) -> SortedMap<u64, u64> {
    keys.iter().fold(SortedMap::new(), |map, &k| map.insert(k, k))
}

fn insert_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_map_insert");
    for size in [16usize, 25, 100, 1_000, 10_000] {
        let keys = shuffled_keys(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| black_box(build(keys)));
        });
    }
    group.finish();
}

fn get_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_map_get");
    group.throughput(Throughput::Elements(1));
    for size in [16usize, 10_000] {
        let keys = shuffled_keys(size);
        let map = build(&keys);
        group.bench_with_input(BenchmarkId::new("hit", size), &map, |b, map| {
            let mut state = BENCH_SEED;
            b.iter(|| {
                let k = lcg_next(&mut state) % size as u64;
                black_box(map.get(&k))
            });
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &map, |b, map| {
            b.iter(|| black_box(map.get(&u64::MAX)));
        });
    }
    group.finish();
}

fn share_benchmarks(c: &mut Criterion) {
    let map = build(&shuffled_keys(10_000));
    c.bench_function("sorted_map_share", |b| {
        b.iter(|| black_box(map.insert(5_000, 5_000)));
    });
}

criterion_group!(benches, insert_benchmarks, get_benchmarks, share_benchmarks);
criterion_main!(benches);
