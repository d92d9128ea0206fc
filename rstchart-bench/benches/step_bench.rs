//! Step algorithm benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rstchart_bench::{ring_chart, workflow_chart};
use rstchart_core::{Collaborators, Event, Interpreter, JsonDataModel};
use rstchart_model::Chart;
use std::sync::Arc;

fn interpreter(chart: &Arc<Chart>) -> Interpreter {
    let mut interp = Interpreter::new(
        Arc::clone(chart),
        "bench",
        Box::new(JsonDataModel::new()),
        Collaborators::default(),
    );
    interp.initialize().unwrap();
    interp
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("chart_compile");

    for width in [10usize, 100] {
        let definition = ring_chart(width).definition().clone();
        group.bench_with_input(BenchmarkId::new("ring", width), &definition, |b, def| {
            b.iter(|| black_box(Chart::from_definition(def.clone()).unwrap()))
        });
    }

    let workflow = workflow_chart().definition().clone();
    group.bench_function("workflow", |b| {
        b.iter(|| black_box(Chart::from_definition(workflow.clone()).unwrap()))
    });

    group.finish();
}

fn bench_initialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter_initialize");
    let chart = Arc::new(workflow_chart());

    group.throughput(Throughput::Elements(1));
    group.bench_function("workflow", |b| {
        b.iter(|| black_box(interpreter(&chart)))
    });

    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter_step");
    group.throughput(Throughput::Elements(1));

    for width in [10usize, 100] {
        let chart = Arc::new(ring_chart(width));
        let mut interp = interpreter(&chart);
        group.bench_function(BenchmarkId::new("ring", width), |b| {
            b.iter(|| {
                let outcome = interp.step(Some(Event::new("next"))).unwrap();
                interp.drain_trace();
                black_box(outcome)
            })
        });
    }

    let chart = Arc::new(workflow_chart());
    let mut interp = interpreter(&chart);
    group.bench_function("parallel_tick", |b| {
        b.iter(|| {
                let outcome = interp.step(Some(Event::new("tick"))).unwrap();
                interp.drain_trace();
                black_box(outcome)
            })
    });

    let mut interp = interpreter(&chart);
    group.bench_function("history_pause_resume", |b| {
        b.iter(|| {
            interp.step(Some(Event::new("pause"))).unwrap();
            let outcome = interp.step(Some(Event::new("resume"))).unwrap();
            interp.drain_trace();
            black_box(outcome)
        })
    });

    // events nothing listens for still walk the whole configuration
    let mut interp = interpreter(&chart);
    group.bench_function("unmatched_event", |b| {
        b.iter(|| {
                let outcome = interp.step(Some(Event::new("ignored"))).unwrap();
                interp.drain_trace();
                black_box(outcome)
            })
    });

    group.finish();
}

fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter_checkpoint");
    let chart = Arc::new(workflow_chart());
    let mut interp = interpreter(&chart);
    for _ in 0..3 {
        interp.step(Some(Event::new("tick"))).unwrap();
    }

    group.bench_function("checkpoint", |b| {
        b.iter(|| black_box(interp.checkpoint().unwrap()))
    });

    let cursor = interp.checkpoint().unwrap();
    group.bench_function("restore", |b| {
        b.iter(|| {
            let mut resumed = Interpreter::new(
                Arc::clone(&chart),
                "bench",
                Box::new(JsonDataModel::new()),
                Collaborators::default(),
            );
            black_box(resumed.restore(&cursor).unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_compile,
    bench_initialize,
    bench_step,
    bench_checkpoint
);
criterion_main!(benches);
