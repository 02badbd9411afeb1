//! Codec benchmarks for taskwire-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use taskwire_protocol::{codec, Frame, Inbound};

fn notification_frame() -> Frame {
    Frame::new(
        "new_notification",
        json!({
            "id": "n-1024",
            "type": "task_assigned",
            "title": "Task assigned",
            "message": "You were assigned to 'Ship the release notes'",
            "priority": "high",
            "projectId": "p-7",
            "createdAt": "2024-05-01T10:00:00Z"
        }),
    )
}

fn bench_json(c: &mut Criterion) {
    let frame = notification_frame();
    let encoded = codec::encode_json(&frame).unwrap();

    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| codec::encode_json(black_box(&frame))));
    group.bench_function("decode", |b| {
        b.iter(|| codec::decode_json(black_box(&encoded)))
    });
    group.finish();
}

fn bench_msgpack(c: &mut Criterion) {
    let frame = notification_frame();
    let encoded = codec::encode_msgpack(&frame).unwrap();

    let mut group = c.benchmark_group("msgpack");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| codec::encode_msgpack(black_box(&frame)))
    });
    group.bench_function("decode", |b| {
        b.iter(|| codec::decode_msgpack(black_box(&encoded)))
    });
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let frame = notification_frame();

    c.bench_function("parse_notification", |b| {
        b.iter(|| Inbound::parse(black_box(&frame)).unwrap())
    });
}

criterion_group!(benches, bench_json, bench_msgpack, bench_parse);
criterion_main!(benches);
