use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sbtree::{algebra::Sum, Interval, SegmentTree};

const BRANCHING_FACTOR: usize = 32;

fn random_tuples(count: usize, seed: u64) -> Vec<(Interval, i64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let start = rng.gen_range(0..1_000_000u32);
            let end = start + rng.gen_range(1..10_000u32);
            (Interval::new(start, end), rng.gen_range(1..100i64))
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let tuples = random_tuples(1_000, 0);

    c.bench_function("insert_1k", |b| {
        b.iter(|| {
            let mut tree = SegmentTree::new(BRANCHING_FACTOR, Sum::<i64>::new());
            for &(interval, value) in &tuples {
                tree.insert(interval, value);
            }
            black_box(tree)
        })
    });
}

fn bench_bulk_load(c: &mut Criterion) {
    let tuples = random_tuples(1_000, 1);

    c.bench_function("bulk_load_1k", |b| {
        b.iter(|| {
            let mut tree = SegmentTree::new(BRANCHING_FACTOR, Sum::<i64>::new());
            tree.insert_range(tuples.clone());
            black_box(tree)
        })
    });
}

fn bench_lookup(c: &mut Criterion) {
    let mut tree = SegmentTree::new(BRANCHING_FACTOR, Sum::<i64>::new());
    for (interval, value) in random_tuples(10_000, 2) {
        tree.insert(interval, value);
    }

    let mut rng = StdRng::seed_from_u64(3);
    let instants: Vec<u32> = (0..1_000).map(|_| rng.gen_range(0..1_100_000)).collect();

    c.bench_function("lookup_1k_of_10k", |b| {
        b.iter(|| {
            for &instant in &instants {
                black_box(tree.aggregate_at(instant));
            }
        })
    });
}

fn bench_range_query(c: &mut Criterion) {
    let mut tree = SegmentTree::new(BRANCHING_FACTOR, Sum::<i64>::new());
    for (interval, value) in random_tuples(10_000, 4) {
        tree.insert(interval, value);
    }

    c.bench_function("range_query_of_10k", |b| {
        b.iter(|| black_box(tree.aggregate_within(Interval::new(200_000, 800_000))))
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_bulk_load,
    bench_lookup,
    bench_range_query
);
criterion_main!(benches);
