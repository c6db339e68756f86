//! Performance benchmarks for the media store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mediastore::{AudioBlob, Session, Store, StoreConfig, Timestamp};
use serde_json::json;
use tempfile::TempDir;

fn create_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        cache_size: 1000,
        create_if_missing: true,
    })
    .unwrap()
}

fn seeded_store(dir: &TempDir, session_count: usize) -> Store {
    let store = create_store(dir);
    for i in 0..session_count {
        let mut session = Session::new(format!("s{}", i));
        session.last_opened_at = Timestamp(i as i64);
        store.sessions().add(session).unwrap();
    }
    store
}

/// Benchmark session writes (fsync per append dominates).
fn bench_session_add(c: &mut Criterion) {
    c.bench_function("session_add", |b| {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir);
        let mut i = 0u64;

        b.iter(|| {
            store.sessions().add(Session::new(format!("s{}", i))).unwrap();
            i += 1;
        });
    });
}

/// Benchmark point lookups against a warm store.
fn bench_session_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_get");

    for size in [100, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::new("store_size", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = seeded_store(&dir, size);
            let mut i = 0usize;

            b.iter(|| {
                let id = format!("s{}", i % size);
                black_box(store.sessions().get(&id).unwrap());
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark the update merge path.
fn bench_session_update(c: &mut Criterion) {
    c.bench_function("session_update", |b| {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, 100);
        let mut progress = 0.0f64;

        b.iter(|| {
            progress += 1.0;
            store
                .sessions()
                .update("s50", json!({ "progress": progress }))
                .unwrap();
        });
    });
}

/// Benchmark full-scan sorted listing at varying collection sizes.
fn bench_list_sorted(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_sorted_desc");

    for size in [100, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::new("store_size", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = seeded_store(&dir, size);

            b.iter(|| {
                black_box(store.sessions().list_sorted_desc("lastOpenedAt").unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a vacuum pass over a half-orphaned blob set.
fn bench_vacuum(c: &mut Criterion) {
    let mut group = c.benchmark_group("vacuum");
    group.sample_size(10);

    for blob_count in [50, 500] {
        group.bench_with_input(
            BenchmarkId::new("blob_count", blob_count),
            &blob_count,
            |b, &blob_count| {
                b.iter_with_setup(
                    || {
                        let dir = TempDir::new().unwrap();
                        let store = create_store(&dir);
                        for i in 0..blob_count {
                            let audio_id = format!("a{}", i);
                            store
                                .audios()
                                .add(AudioBlob::new(&audio_id, vec![0u8; 1024], "audio/mpeg"))
                                .unwrap();
                            if i % 2 == 0 {
                                let mut session = Session::new(format!("s{}", i));
                                session.audio_id = Some(audio_id);
                                store.sessions().add(session).unwrap();
                            }
                        }
                        (dir, store)
                    },
                    |(_dir, store)| {
                        black_box(store.vacuum().unwrap());
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_session_add,
    bench_session_get,
    bench_session_update,
    bench_list_sorted,
    bench_vacuum
);
criterion_main!(benches);
