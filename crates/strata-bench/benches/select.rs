//! Selection benchmarks for Strata.
//!
//! Benchmarks for:
//! - Full scans with decoding
//! - Attribute queries on detached layers
//! - Counting and chunk size effects

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use strata_bench::utils::{generate_documents, AnimalTagger, BenchStore};
use strata_store::{LayerOptions, Query};

const CORPUS_SIZE: usize = 2_000;

fn setup() -> BenchStore {
    let store = BenchStore::new().unwrap();
    let documents = generate_documents(CORPUS_SIZE, 12).unwrap();
    let collection = store.collection("bench", &documents).unwrap();
    collection
        .create_layer(&AnimalTagger::new().unwrap(), &LayerOptions::new().sparse(true))
        .unwrap();
    store
}

/// Benchmark iterating all documents.
fn bench_full_scan(c: &mut Criterion) {
    let store = setup();
    let collection = store.storage.collection("bench").unwrap();

    let mut group = c.benchmark_group("select/full_scan");
    group.throughput(Throughput::Elements(CORPUS_SIZE as u64));
    group.sample_size(20);

    group.bench_function("attached_only", |b| {
        b.iter(|| {
            let selection = collection.select();
            black_box(selection.iter().unwrap().filter_map(Result::ok).count())
        });
    });

    group.bench_function("with_detached", |b| {
        b.iter(|| {
            let selection = collection.select().layers(["animals"]);
            black_box(selection.iter().unwrap().filter_map(Result::ok).count())
        });
    });

    group.finish();
}

/// Benchmark an attribute query against the detached layer.
fn bench_attribute_query(c: &mut Criterion) {
    let store = setup();
    let collection = store.storage.collection("bench").unwrap();

    c.bench_function("select/attribute_query", |b| {
        b.iter(|| {
            let query = Query::layer_attribute("animals", [("kind", json!("dog"))]);
            black_box(collection.select().query(query).ids().unwrap().len())
        });
    });

    c.bench_function("select/count", |b| {
        b.iter(|| {
            let query = Query::layer_attribute("animals", [("kind", json!("cat"))]);
            black_box(collection.select().query(query).count().unwrap())
        });
    });
}

/// Benchmark the chunk size of paginated reads.
fn bench_itersize(c: &mut Criterion) {
    let store = setup();
    let collection = store.storage.collection("bench").unwrap();

    let mut group = c.benchmark_group("select/itersize");
    group.sample_size(20);

    for itersize in [10, 100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(itersize), itersize, |b, &itersize| {
            b.iter(|| {
                let selection = collection.select().itersize(itersize);
                black_box(selection.iter().unwrap().filter_map(Result::ok).count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_full_scan, bench_attribute_query, bench_itersize);

criterion_main!(benches);
