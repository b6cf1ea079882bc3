//! Hot-path benchmarks for request rewriting and body capture

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use http_body_util::Full;
use hyper::header::{AUTHORIZATION, HeaderValue};
use hyper::{HeaderMap, Method, Uri};
use proximity::body::CapturedBody;
use proximity::outbound::OutboundRequest;
use proximity::rewrite::RequestRewriter;

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite");
    let rewriter = RequestRewriter::new("https://api.example.com:8443").unwrap();

    for target in ["/", "/v1/items?id=42&sort=desc", "/files/a%20b/c%2Fd?q=%E2%9C%93"] {
        let uri: Uri = target.parse().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(target), &uri, |b, uri| {
            b.iter(|| black_box(rewriter.rewrite(black_box(uri))))
        });
    }

    group.finish();
}

fn bench_outbound(c: &mut Criterion) {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t0ken"));
    for i in 0..16 {
        headers.append("x-trace", HeaderValue::from_str(&format!("span-{}", i)).unwrap());
    }
    let uri: Uri = "https://api.example.com/v1/items".parse().unwrap();
    let body = Bytes::from(vec![b'a'; 4096]);

    c.bench_function("outbound_request", |b| {
        b.iter(|| {
            let outbound = OutboundRequest::new(Method::POST, uri.clone(), &headers, body.clone());
            black_box(outbound.to_request())
        })
    });
}

fn bench_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [0usize, 1024, 64 * 1024] {
        let payload = Bytes::from(vec![b'x'; size]);
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let captured = runtime
                    .block_on(CapturedBody::capture(Full::new(payload.clone())))
                    .unwrap();
                black_box(captured.into_copies())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_outbound, bench_capture);
criterion_main!(benches);
