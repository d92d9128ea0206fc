//! Session runtime and checkpoint store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rstchart_bench::{ring_chart, workflow_chart};
use rstchart_core::{Collaborators, Event, Interpreter, JsonDataModel};
use rstchart_runtime::{Config, Runtime as ChartRuntime, SpawnOptions};
use rstchart_storage::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

// Unique session ids across all iterations
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn bench_session_events(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let charts = rt.block_on(async {
        let charts = ChartRuntime::new(Config::default()).unwrap();
        charts.register_chart(ring_chart(10));
        charts
    });

    let charts = &charts;

    let mut group = c.benchmark_group("session_events");
    for events in [10u64, 1000] {
        group.throughput(Throughput::Elements(events));
        group.bench_with_input(BenchmarkId::new("ring10", events), &events, |b, &events| {
            b.to_async(&rt).iter(|| async move {
                let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
                let handle = charts
                    .spawn_with("ring10", SpawnOptions::default().with_session_id(format!("s-{}", id)))
                    .unwrap();
                for _ in 0..events {
                    handle.send(Event::new("next")).await.unwrap();
                }
                black_box(handle.close().await.unwrap())
            });
        });
    }
    group.finish();
}

fn bench_checkpoint_store(c: &mut Criterion) {
    let chart = Arc::new(workflow_chart());
    let mut interp = Interpreter::new(
        Arc::clone(&chart),
        "bench",
        Box::new(JsonDataModel::new()),
        Collaborators::default(),
    );
    interp.initialize().unwrap();
    let cursor = interp.checkpoint().unwrap();

    let mut group = c.benchmark_group("checkpoint_store");
    group.throughput(Throughput::Elements(1));

    let memory = MemoryCheckpointStore::new();
    group.bench_function("memory_save", |b| {
        b.iter(|| black_box(memory.save("bench", &cursor).unwrap()))
    });
    group.bench_function("memory_latest", |b| {
        b.iter(|| black_box(memory.latest("bench").unwrap()))
    });

    let dir = TempDir::new().unwrap();
    let file = FileCheckpointStore::open(dir.path()).unwrap();
    group.bench_function("file_save", |b| {
        b.iter(|| black_box(file.save("bench", &cursor).unwrap()))
    });
    group.bench_function("file_latest", |b| {
        b.iter(|| black_box(file.latest("bench").unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_session_events, bench_checkpoint_store);
criterion_main!(benches);
