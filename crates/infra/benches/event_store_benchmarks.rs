//! Persistence-core benchmarks: append/read throughput on the in-memory
//! store and streaming-hash throughput for blob ingest.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::io::Cursor;

use serde_json::json;

use calista_blobstore::hash_reader;
use calista_core::EventId;
use calista_events::{EventBatch, EventStore, InMemoryEventStore, StreamRange, UncommittedEvent};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

fn event(stream_id: &str, version: u64) -> UncommittedEvent {
    UncommittedEvent::parse_parts(
        &EventId::new().to_string(),
        "Session",
        stream_id,
        version,
        "SessionStarted",
        json!({"name": "n1", "exposure_s": 120.5}),
        json!({}),
    )
    .expect("valid event")
}

fn bench_append_latency(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("append_single_event", |b| {
        let store = InMemoryEventStore::new();
        let mut version = 0u64;
        b.iter(|| {
            version += 1;
            let batch = EventBatch::single(event("S1", version)).unwrap();
            rt.block_on(store.append(batch)).unwrap();
        });
    });
}

fn bench_append_batches(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("append_batch");

    for batch_size in [1u64, 10, 100] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let store = InMemoryEventStore::new();
                let mut next_version = 1u64;
                b.iter(|| {
                    let events: Vec<_> = (0..batch_size)
                        .map(|i| event("S1", next_version + i))
                        .collect();
                    next_version += batch_size;
                    rt.block_on(store.append(EventBatch::new(events).unwrap())).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_read_stream(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryEventStore::new();
    let events: Vec<_> = (1..=1000).map(|v| event("S1", v)).collect();
    rt.block_on(store.append(EventBatch::new(events).unwrap())).unwrap();
    let stream_id = calista_core::StreamId::new("S1").unwrap();

    c.bench_function("read_stream_1000_events", |b| {
        b.iter(|| {
            let read = rt
                .block_on(store.read_stream(&stream_id, StreamRange::default()))
                .unwrap();
            black_box(read.len());
        });
    });
}

fn bench_streaming_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_reader");

    for size in [4 * 1024usize, 1024 * 1024] {
        let payload = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let (digest, n) = hash_reader(Cursor::new(payload)).unwrap();
                black_box((digest, n));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_append_latency,
    bench_append_batches,
    bench_read_stream,
    bench_streaming_hash
);
criterion_main!(benches);
