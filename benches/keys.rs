//! Hot-path benchmark suite.
//!
//! Benchmarks the work done on every subscribe and every received event:
//! - Identity hashing with growing header and variable counts
//! - SSE parsing with different chunk sizes
//!
//! Run with: cargo bench --bench keys
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use graphql_subscription_client::key::{connection_key, subscription_key};
use graphql_subscription_client::transport::SseParser;
use graphql_subscription_client::{Options, Request};
use serde_json::{Map, Value, json};
use std::hint::black_box;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const HEADER_COUNTS: &[usize] = &[0, 4, 16];
const VARIABLE_COUNTS: &[usize] = &[0, 8, 64];
const CHUNK_SIZES: &[usize] = &[64, 1024, 16 * 1024];
const EVENT_COUNT: usize = 256;

// ============================================================================
// Fixtures
// ============================================================================

fn options(headers: usize) -> Options {
    (0..headers).fold(
        Options::new("wss://api.example.com/graphql").with_init_payload(json!({ "token": "abc" })),
        |options, i| {
            options
                .with_header(&format!("x-header-{i}"), &format!("value-{i}"))
                .expect("valid header")
        },
    )
}

fn request(variables: usize) -> Request {
    let variables: Map<String, Value> = (0..variables)
        .map(|i| (format!("var{i}"), json!({ "id": i, "tags": ["a", "b"] })))
        .collect();
    Request::new("subscription OnPrice($symbol: String!) { price(symbol: $symbol) { value } }")
        .with_operation_name("OnPrice")
        .with_variables(Value::Object(variables))
}

fn event_stream() -> Vec<u8> {
    let mut body = String::new();
    for i in 0..EVENT_COUNT {
        body.push_str(": keep-alive\n");
        body.push_str("event: next\n");
        body.push_str(&format!("data: {{\"data\":{{\"price\":{{\"value\":{i}}}}}}}\n\n"));
    }
    body.push_str("event: complete\ndata:\n\n");
    body.into_bytes()
}

// ============================================================================
// Benchmark: Identity Keys
// ============================================================================

fn bench_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("keys");

    for &headers in HEADER_COUNTS {
        let options = options(headers);
        group.bench_with_input(
            BenchmarkId::new("connection_key", headers),
            &options,
            |b, options| b.iter(|| connection_key(black_box(options))),
        );
    }

    let options = options(4);
    for &variables in VARIABLE_COUNTS {
        let request = request(variables);
        group.bench_with_input(
            BenchmarkId::new("subscription_key", variables),
            &request,
            |b, request| b.iter(|| subscription_key(black_box(&options), black_box(request))),
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: SSE Parsing
// ============================================================================

fn bench_sse_parse(c: &mut Criterion) {
    let body = event_stream();

    let mut group = c.benchmark_group("sse_parse");
    group.throughput(Throughput::Bytes(body.len() as u64));

    for &chunk_size in CHUNK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("chunked", chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut parser = SseParser::new();
                    let mut messages = 0;
                    for chunk in body.chunks(chunk_size) {
                        for event in parser.push(chunk) {
                            black_box(event.into_message());
                            messages += 1;
                        }
                    }
                    messages
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_keys, bench_sse_parse);
criterion_main!(benches);
