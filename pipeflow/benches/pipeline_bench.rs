//! Benchmarks for graph construction and execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pipeflow::pipeline::{detect_cycle, topological_order, Executor, PipelineBuilder};
use pipeflow::testing::ExprEvaluator;
use pipeflow::value::Environment;

/// `width` independent leaves feeding a chain of `width` sums.
fn wide_block(width: usize) -> PipelineBuilder {
    let mut builder = PipelineBuilder::new();
    builder.add_node("total", format!("s{}", width - 1));
    for i in (0..width).rev() {
        let body = if i == 0 {
            "leaf0".to_string()
        } else {
            format!("s{} + leaf{i}", i - 1)
        };
        builder.add_node(format!("s{i}"), body);
    }
    for i in 0..width {
        builder.add_node(format!("leaf{i}"), format!("{i} * 2"));
    }
    builder
}

fn pipeline_benchmark(c: &mut Criterion) {
    let eval = ExprEvaluator::new();
    let env = Environment::new();
    let mut group = c.benchmark_group("pipeline");

    for width in [16_usize, 128] {
        group.bench_with_input(BenchmarkId::new("build_graph", width), &width, |b, &w| {
            b.iter(|| black_box(wide_block(w).build(&eval)));
        });

        let skeleton = wide_block(width).build(&eval).expect("valid block");
        group.bench_with_input(BenchmarkId::new("schedule", width), &skeleton, |b, s| {
            b.iter(|| {
                detect_cycle(s).expect("acyclic");
                black_box(topological_order(s))
            });
        });

        group.bench_with_input(BenchmarkId::new("run", width), &skeleton, |b, s| {
            b.iter(|| black_box(Executor::new(&eval, &env).run(s.clone())));
        });

        let pipeline = Executor::new(&eval, &env).run(skeleton.clone()).expect("evaluates");
        group.bench_with_input(BenchmarkId::new("rerun_cached", width), &pipeline, |b, p| {
            b.iter(|| black_box(Executor::new(&eval, &env).rerun(p)));
        });
    }

    group.finish();
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
