//! # Schema-Bus Codec Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | Avro encode | JSON value → Avro datum for a small record |
//! | Avro decode | raw datum → JSON value |
//! | Prefix fallback | decode of a Confluent-framed datum (failed raw attempt + retry) |
//! | Backoff | delay computation for a full retry budget |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use schema_bus::adapters::AvroCodec;
use schema_bus::algorithms::ExponentialBackoff;
use schema_bus::{decode_with_fallback, Codec, RetryPolicy, SchemaHandle};

const ORDER_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "amount_cents", "type": "long"},
        {"name": "note", "type": ["null", "string"], "default": null}
    ]
}"#;

fn order() -> serde_json::Value {
    serde_json::json!({"id": "order-000042", "amount_cents": 129_900, "note": "gift wrap"})
}

// ============================================================================
// AVRO CODEC
// ============================================================================

fn bench_avro(c: &mut Criterion) {
    let codec = Arc::new(AvroCodec::new());
    let handle = SchemaHandle::new(7, ORDER_SCHEMA).with_version(1);
    let value = order();
    let datum = codec.encode(&handle, &value).expect("order encodes");
    let mut framed = vec![0u8];
    framed.extend_from_slice(&handle.id().to_be_bytes());
    framed.extend_from_slice(&datum);

    let mut group = c.benchmark_group("avro-codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode", |b| {
        b.iter(|| black_box(codec.encode(&handle, black_box(&value)).is_ok()))
    });
    group.bench_function("decode_raw", |b| {
        b.iter(|| black_box(codec.decode(&handle, black_box(&datum)).is_ok()))
    });
    group.bench_function("decode_framed_fallback", |b| {
        b.iter(|| black_box(decode_with_fallback(codec.as_ref(), &handle, black_box(&framed), 5).is_ok()))
    });

    group.finish();
}

// ============================================================================
// BACKOFF
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    let policy = RetryPolicy::default();

    c.bench_function("backoff-full-budget", |b| {
        b.iter(|| {
            let mut backoff = ExponentialBackoff::new(&policy);
            let mut elapsed = Duration::ZERO;
            while let Some(delay) = backoff.next_delay(elapsed) {
                elapsed += delay;
            }
            black_box(elapsed)
        })
    });
}

criterion_group!(benches, bench_avro, bench_backoff);
criterion_main!(benches);
