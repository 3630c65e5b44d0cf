use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use volume_store::CompactMap;

fn insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact map insert");

    group.bench_function("monotonic keys", |b| {
        let map = CompactMap::new();
        let mut key = 0u64;
        b.iter(|| {
            key += 1;
            map.set(key, 1, 8);
        });
    });

    group.bench_function("random keys", |b| {
        let map = CompactMap::new();
        let mut rng = rand::thread_rng();
        b.iter(|| {
            map.set(rng.gen(), 1, 8);
        });
    });
}

fn point_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact map get");

    let map = CompactMap::new();
    for key in 0..1_000_000u64 {
        map.set(key, 1, 8);
    }

    let mut rng = rand::thread_rng();

    group.bench_function("hit", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..1_000_000);
            assert!(map.get(key).is_some());
        })
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            let key = rng.gen_range(1_000_000..2_000_000);
            assert!(map.get(key).is_none());
        })
    });
}

criterion_group!(benches, insert, point_read);
criterion_main!(benches);
