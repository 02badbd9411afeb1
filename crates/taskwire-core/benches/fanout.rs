//! Fan-out benchmarks for taskwire-core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use taskwire_core::{DispatchConfig, Dispatcher, Event, Router, Subscription};
use taskwire_protocol::Frame;
use tokio::time::Instant;

/// Benchmark publishing to a growing number of handlers.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for subscribers in [1usize, 10, 100] {
        let router = Router::new();
        let _subs: Vec<Subscription> = (0..subscribers)
            .map(|_| router.subscribe("taskUpdated", |_| Ok(())).unwrap())
            .collect();
        let event = Event::Inbound {
            topic: "taskUpdated".to_string(),
            payload: json!({"id": "t-1", "status": "done"}),
        };

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &event,
            |b, event| b.iter(|| router.publish(black_box(event))),
        );
    }

    group.finish();
}

/// Benchmark subscribe followed by drop.
fn bench_subscribe(c: &mut Criterion) {
    let router = Router::new();
    c.bench_function("subscribe_drop", |b| {
        b.iter(|| {
            let sub = router.subscribe("taskUpdated", |_| Ok(())).unwrap();
            black_box(&sub);
        })
    });
}

/// Benchmark the full dispatch path for stateful frames.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let dispatcher = Dispatcher::new(Router::new(), DispatchConfig::default());

    let typing = Frame::new(
        "userTyping",
        json!({"roomId": "d-1", "userId": "u-1", "userName": "Ana"}),
    );
    group.bench_function("typing_refresh", |b| {
        b.iter(|| dispatcher.dispatch(black_box(typing.clone()), Instant::now()))
    });

    let roster = Frame::new(
        "userJoinedProject",
        json!({"projectId": "p-1", "onlineUsers": ["u-1", "u-2", "u-3"]}),
    );
    group.bench_function("roster", |b| {
        b.iter(|| dispatcher.dispatch(black_box(roster.clone()), Instant::now()))
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_subscribe, bench_dispatch);
criterion_main!(benches);
