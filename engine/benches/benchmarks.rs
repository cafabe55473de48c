//! Performance benchmarks for atelier-engine

use atelier_engine::{Entity, EntityCache, OptimisticPatch, Post};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn test_post(id: u64) -> Entity {
    Entity::Post(Post {
        id: format!("post_{}", id),
        author_id: "ana".into(),
        content: "studio update".into(),
        media_ref: None,
        like_count: 5,
        comment_count: 2,
        viewer_has_liked: false,
    })
}

fn bench_cache_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_operations");

    group.bench_function("upsert_authoritative", |b| {
        let mut cache = EntityCache::new();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            cache.upsert_authoritative(black_box(test_post(id)));
        })
    });

    group.bench_function("upsert_idempotent_rerun", |b| {
        let mut cache = EntityCache::new();
        cache.upsert_authoritative(test_post(1));

        b.iter(|| {
            cache.upsert_authoritative(black_box(test_post(1)));
        })
    });

    group.bench_function("toggle_confirm_cycle", |b| {
        let mut cache = EntityCache::new();
        cache.upsert_authoritative(test_post(1));

        b.iter(|| {
            let token = cache
                .apply_optimistic("post_1", OptimisticPatch::ToggleReaction, 1000)
                .unwrap();
            cache.confirm(black_box(token)).unwrap();
        })
    });

    group.bench_function("toggle_rollback_cycle", |b| {
        let mut cache = EntityCache::new();
        cache.upsert_authoritative(test_post(1));

        b.iter(|| {
            let token = cache
                .apply_optimistic("post_1", OptimisticPatch::ToggleReaction, 1000)
                .unwrap();
            cache.rollback(black_box(token)).unwrap();
        })
    });

    group.finish();
}

fn bench_cache_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_scaling");

    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("get", size), &size, |b, &size| {
            let mut cache = EntityCache::new();
            for i in 0..size {
                cache.upsert_authoritative(test_post(i));
            }

            b.iter(|| cache.get(black_box("post_50")))
        });

        group.bench_with_input(
            BenchmarkId::new("merge_into_populated", size),
            &size,
            |b, &size| {
                let mut cache = EntityCache::new();
                for i in 0..size {
                    cache.upsert_authoritative(test_post(i));
                }
                let mut id = size;

                b.iter(|| {
                    id += 1;
                    cache.upsert_authoritative(black_box(test_post(id)));
                })
            },
        );
    }

    group.finish();
}

fn bench_observers(c: &mut Criterion) {
    let mut group = c.benchmark_group("observers");

    group.bench_function("notify_ten_observers", |b| {
        let mut cache = EntityCache::new();
        cache.upsert_authoritative(test_post(1));
        for _ in 0..10 {
            cache.subscribe("post_1", |_| {});
        }
        let mut likes = 5u64;

        b.iter(|| {
            likes += 1;
            let mut entity = test_post(1);
            if let Entity::Post(post) = &mut entity {
                post.like_count = likes;
            }
            cache.upsert_authoritative(black_box(entity));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_operations,
    bench_cache_scaling,
    bench_observers
);
criterion_main!(benches);
