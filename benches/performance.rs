//! Performance benchmarks for the reconciliation engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rowsync::{
    EditTracker, Field, MergeMode, MutationEvent, OverlayKeys, ReconciliationMerger, Record,
    RecordStore, RowId, SnapshotLoader,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

fn merger(capacity: usize) -> ReconciliationMerger {
    ReconciliationMerger::new(
        OverlayKeys::default(),
        capacity,
        Duration::from_secs(9),
        Duration::from_secs(9),
    )
}

fn inventory(size: u64) -> RecordStore {
    let mut store = RecordStore::new();
    store.replace_all(
        (1..=size)
            .map(|i| {
                Record::new(RowId(i))
                    .with(Field::Barcode, format!("88{:06}", i))
                    .with(Field::Quantity, 1_000_000)
                    .with(Field::DrugName, format!("drug {}", i))
            })
            .collect(),
    );
    store
}

fn count_event(code: String) -> MutationEvent {
    serde_json::from_value(json!({"drug_standard_code": code, "count_quantity": 1})).unwrap()
}

/// Benchmark overlay merges against growing inventories
fn bench_overlay(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlay");

    for size in [100u64, 1000, 5000] {
        group.bench_with_input(BenchmarkId::new("rows", size), &size, |b, &size| {
            let mut store = inventory(size);
            let mut edits = EditTracker::new();
            let mut merger = merger(50);
            let event = count_event(format!("88{:06}", size / 2));
            let now = Instant::now();

            b.iter(|| {
                black_box(
                    merger
                        .apply(&event, MergeMode::Overlay, &mut store, &mut edits, now)
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

/// Benchmark prepend into a full log
fn bench_prepend_capped(c: &mut Criterion) {
    let mut store = RecordStore::new();
    let mut edits = EditTracker::new();
    let mut merger = merger(50);
    let now = Instant::now();
    let mut next_id = 0u64;

    c.bench_function("prepend_capped_50", |b| {
        b.iter(|| {
            next_id += 1;
            let event: MutationEvent = serde_json::from_value(json!({
                "id": next_id,
                "timestamp": "20250314_101500",
                "drug_name": "Aspirin",
                "drug_standard_code": "880123",
                "count_quantity": 30,
            }))
            .unwrap();
            black_box(
                merger
                    .apply(&event, MergeMode::Prepend, &mut store, &mut edits, now)
                    .unwrap(),
            );
        });
    });
}

/// Benchmark snapshot decode
fn bench_decode(c: &mut Criterion) {
    let rows: Vec<Value> = (0..1000)
        .map(|i| {
            json!({
                "id": i,
                "timestamp": "20250314_101500",
                "drug_name": "Aspirin",
                "drug_standard_code": "880123",
                "count_quantity": 30,
            })
        })
        .collect();

    c.bench_function("decode_1000_log_rows", |b| {
        b.iter(|| black_box(SnapshotLoader::decode(rows.clone()).unwrap()));
    });
}

criterion_group!(benches, bench_overlay, bench_prepend_capped, bench_decode);

criterion_main!(benches);
