use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use insights_bench::insights_compiler::{CompilerConfig, InsightsCompiler};
use insights_bench::parser::parse_request;
use insights_bench::TimeRange;
use serde_json::{json, Value};
use std::hint::black_box;

fn test_cases() -> Vec<(&'static str, Value)> {
    vec![
        ("term", json!({"query": {"term": {"host": "service.internal"}}})),
        (
            "bool",
            json!({"query": {"bool": {
                "must": [
                    {"match": {"message": "connection reset"}},
                    {"range": {"status": {"gte": 500, "lt": 600}}}
                ],
                "should": [
                    {"wildcard": {"host": "*-cell-1-*"}},
                    {"term": {"zone": "us-east-1a"}}
                ],
                "must_not": [{"term": {"level": "DEBUG"}}]
            }}}),
        ),
        (
            "terms_agg",
            json!({
                "size": 0,
                "query": {"range": {"latency": {"gt": 100}}},
                "aggs": {"by_path": {
                    "terms": {"field": "path", "size": 10},
                    "aggs": {"p": {"avg": {"field": "latency"}}}
                }}
            }),
        ),
    ]
}

fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, body) in test_cases() {
        group.bench_with_input(BenchmarkId::new("parse", name), &body, |b, body| {
            b.iter(|| match parse_request(black_box(body)) {
                Ok(request) => black_box(request),
                Err(e) => panic!("parse failed: {}", e),
            })
        });
    }

    group.finish();
}

fn benchmark_compiler(c: &mut Criterion) {
    let compiler = InsightsCompiler::new();
    let time_range = TimeRange::new(1_700_000_000, 1_700_086_400);
    let mut group = c.benchmark_group("compiler_performance");

    for (name, body) in test_cases() {
        let request = parse_request(&body).expect("benchmark body should parse");

        group.bench_with_input(BenchmarkId::new("compile", name), &request, |b, request| {
            b.iter(|| match compiler.compile(black_box(request), time_range) {
                Ok(query) => black_box(query.query_string()),
                Err(e) => panic!("compile failed: {}", e),
            })
        });
    }

    group.finish();
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let time_range = TimeRange::new(1_700_000_000, 1_700_086_400);
    let mut group = c.benchmark_group("end_to_end_performance");

    for verbatim_match in [false, true] {
        let compiler = InsightsCompiler::with_config(CompilerConfig {
            verbatim_match,
            ..Default::default()
        });
        let label = if verbatim_match { "verbatim" } else { "escaped" };

        for (name, body) in test_cases() {
            group.bench_with_input(
                BenchmarkId::new(format!("full_pipeline_{}", label), name),
                &body,
                |b, body| {
                    b.iter(|| {
                        let request = parse_request(black_box(body)).expect("parse should succeed");
                        let query = compiler
                            .compile(&request, time_range)
                            .expect("compile should succeed");
                        black_box(query.query_string())
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_parser, benchmark_compiler, benchmark_end_to_end);
criterion_main!(benches);
