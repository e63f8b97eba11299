//! Benchmarks for EVT 3.0 encode and decode throughput.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use evtio_core::decoder::decode_words;
use evtio_core::random::random_events;
use evtio_core::{decode_file, ChunkDecoder, DecodeState, Evt3Encoder};
use std::path::Path;

const TEST_FILE: &str = "test_data/laser.raw";
const N_EVENTS: usize = 1_000_000;

fn encode_benchmark(c: &mut Criterion) {
    let events = random_events(N_EVENTS, 1280, 720, 0, 1_000_000, 42);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("random_1m_events", |b| {
        let mut out = Vec::with_capacity(events.len() * 8);
        b.iter(|| {
            out.clear();
            let mut encoder = Evt3Encoder::new();
            encoder.encode(black_box(&events), &mut out);
            black_box(out.len())
        })
    });

    group.finish();
}

fn decode_buffer_benchmark(c: &mut Criterion) {
    let events = random_events(N_EVENTS, 1280, 720, 0, 1_000_000, 42);
    let mut words = Vec::new();
    Evt3Encoder::new().encode_words(&events, &mut words);

    let mut group = c.benchmark_group("decode_buffer");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("random_1m_events", |b| {
        let mut out = Vec::with_capacity(events.len());
        let mut triggers = Vec::new();
        b.iter(|| {
            out.clear();
            let mut state = DecodeState::default();
            decode_words(black_box(&words), &mut state, &mut out, &mut triggers);
            black_box(out.len())
        })
    });

    group.finish();
}

fn decode_chunked_benchmark(c: &mut Criterion) {
    let events = random_events(N_EVENTS, 1280, 720, 0, 1_000_000, 42);
    let mut bytes = Vec::new();
    Evt3Encoder::new().encode(&events, &mut bytes);

    let mut group = c.benchmark_group("decode_chunked");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    for chunk_words in [4_096, 65_536, 1_000_000] {
        group.bench_function(format!("chunk_{}", chunk_words), |b| {
            b.iter(|| {
                let mut decoder = ChunkDecoder::with_chunk_words(black_box(bytes.as_slice()), chunk_words);
                let batch = decoder.decode_to_end().unwrap();
                black_box(batch.events.len())
            })
        });
    }

    group.finish();
}

fn decode_file_benchmark(c: &mut Criterion) {
    let test_path = Path::new(TEST_FILE);
    if !test_path.exists() {
        eprintln!("Benchmark skipped: test file not found at {}", TEST_FILE);
        return;
    }

    let file_size = std::fs::metadata(test_path).unwrap().len();

    let mut group = c.benchmark_group("decode_file");
    group.throughput(Throughput::Bytes(file_size));

    group.bench_function("full_file", |b| {
        b.iter(|| {
            let result = decode_file(black_box(test_path)).unwrap();
            black_box(result.events.len())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    encode_benchmark,
    decode_buffer_benchmark,
    decode_chunked_benchmark,
    decode_file_benchmark
);
criterion_main!(benches);
