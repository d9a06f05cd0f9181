//! Benchmarks for stackforge core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stackforge::core::types::{StackProps, TemplateFormat};
use stackforge::core::{props, resolver, stack, synth};

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 1024, 16384] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(blake3::hash(black_box(input.as_bytes()))));
        });
    }
    group.finish();
}

fn bench_logical_id(c: &mut Criterion) {
    c.bench_function("logical_id", |b| {
        b.iter(|| {
            black_box(synth::logical_id(black_box(&[
                "Vpc",
                "publicSubnet1",
                "DefaultRoute",
            ])))
        });
    });
}

fn bench_props_parse(c: &mut Criterion) {
    let yaml = r#"
stack_name: StreamlitAppStack
description: Streamlit app on a single EC2 instance
env:
  account: "123456789012"
  region: ap-northeast-1
tags:
  team: web
  env: dev
"#;

    c.bench_function("props_parse", |b| {
        b.iter(|| black_box(props::parse_props(black_box(yaml)).unwrap()));
    });
}

fn bench_declare(c: &mut Criterion) {
    c.bench_function("declare_stack", |b| {
        b.iter(|| black_box(stack::declare(StackProps::default())));
    });
}

fn bench_dependency_order(c: &mut Criterion) {
    let declared = stack::declare(StackProps::default());
    c.bench_function("dependency_order", |b| {
        b.iter(|| black_box(resolver::build_dependency_order(black_box(&declared)).unwrap()));
    });
}

fn bench_synthesize(c: &mut Criterion) {
    let declared = stack::declare(StackProps::default());
    c.bench_function("synthesize", |b| {
        b.iter(|| black_box(synth::synthesize(black_box(&declared)).unwrap()));
    });
}

fn bench_render(c: &mut Criterion) {
    let template = synth::synthesize(&stack::declare(StackProps::default())).unwrap();
    let mut group = c.benchmark_group("render");
    for format in [TemplateFormat::Json, TemplateFormat::Yaml] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format.extension()),
            &format,
            |b, &format| {
                b.iter(|| black_box(synth::render(black_box(&template), format).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_logical_id,
    bench_props_parse,
    bench_declare,
    bench_dependency_order,
    bench_synthesize,
    bench_render
);
criterion_main!(benches);
