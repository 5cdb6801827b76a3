//! Benchmarks for hub fan-out
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sensorcast::websocket::{ConnectionHub, HubConfig, OutboundQueue};
use std::sync::Arc;

fn bench_fan_out(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");

    for sessions in [1, 100, 1000] {
        let (hub, queues) = runtime.block_on(async {
            let hub = ConnectionHub::spawn(HubConfig::default());
            let mut queues: Vec<Arc<OutboundQueue>> = Vec::with_capacity(sessions);
            for _ in 0..sessions {
                let queue = hub.new_queue();
                hub.register(uuid::Uuid::new_v4(), Arc::clone(&queue))
                    .await
                    .unwrap();
                queues.push(queue);
            }
            (hub, queues)
        });

        let payload = Bytes::from_static(br#"{"x":0.5,"y":-0.25,"z":1.0,"timestamp":1699000000000}"#);
        group.throughput(Throughput::Elements(sessions as u64));

        group.bench_function(format!("broadcast_{}", sessions), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    hub.broadcast(black_box(payload.clone())).await.unwrap();
                    // Wait for the fan-out to finish
                    hub.connection_count().await
                })
            });
            for queue in &queues {
                queue.drain();
            }
        });

        runtime.block_on(hub.close());
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
