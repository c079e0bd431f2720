//! Ingestion benchmarks for Strata.
//!
//! Benchmarks for:
//! - Buffered document insertion
//! - Detached layer creation from a tagger
//! - Parallel-style block creation of one layer

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use strata_bench::utils::{generate_documents, AnimalTagger, BenchStore};
use strata_common::types::Block;
use strata_store::{CreateMode, LayerOptions};

/// Benchmark inserting documents with an attached layer.
fn bench_insert_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/insert_documents");
    group.sample_size(10);

    for size in [100, 1_000, 5_000].iter() {
        let documents = generate_documents(*size, 12).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || BenchStore::new().unwrap(),
                |store| {
                    let collection = store.collection("bench", &documents).unwrap();
                    black_box(collection.len().unwrap())
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark creating a sparse detached layer.
fn bench_create_layer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/create_layer");
    group.sample_size(10);
    let tagger = AnimalTagger::new().unwrap();

    for size in [100, 1_000].iter() {
        let documents = generate_documents(*size, 12).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || {
                    let store = BenchStore::new().unwrap();
                    store.collection("bench", &documents).unwrap();
                    store
                },
                |store| {
                    let collection = store.storage.collection("bench").unwrap();
                    let report = collection
                        .create_layer(&tagger, &LayerOptions::new().sparse(true))
                        .unwrap();
                    black_box(report.inserted)
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark creating one layer in four blocks on a single connection.
fn bench_create_layer_blocks(c: &mut Criterion) {
    let documents = generate_documents(1_000, 12).unwrap();
    let tagger = AnimalTagger::new().unwrap();

    c.bench_function("ingest/create_layer_blocks", |b| {
        b.iter_batched(
            || {
                let store = BenchStore::new().unwrap();
                store.collection("bench", &documents).unwrap();
                store
            },
            |store| {
                let collection = store.storage.collection("bench").unwrap();
                let options = LayerOptions::new().mode(CreateMode::Append).sparse(true);
                let mut inserted = 0;
                for index in 0..4 {
                    let block = Block::new(4, index).unwrap();
                    inserted += collection.create_layer_block(&tagger, block, &options).unwrap().inserted;
                }
                black_box(inserted)
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_insert_documents,
    bench_create_layer,
    bench_create_layer_blocks,
);

criterion_main!(benches);
