//! Request pipeline benchmarks
//!
//! Run with: `cargo bench --bench pipeline_bench -p waypoint-core --features test-utils`

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;
use waypoint_core::testing::{MockRemoteAuthority, RecordingCredentialStore, ScriptedTransport};
use waypoint_core::RequestPipeline;
use waypoint_domain::{
    AuthorityError, CredentialRecord, RequestOptions, TransportResponse,
};

fn pipeline() -> RequestPipeline {
    let transport = ScriptedTransport::always(
        TransportResponse::new(200, r#"{"id":1,"name":"Ada","roles":["admin","owner"]}"#),
    );
    RequestPipeline::builder(
        Arc::new(transport),
        Arc::new(RecordingCredentialStore::with_record(CredentialRecord::new(
            "access", "refresh", 3600,
        ))),
        Arc::new(MockRemoteAuthority::failing(AuthorityError::Rejected("unused".to_string()))),
    )
    .base_url("https://api.example.com")
    .without_sweeper()
    .build()
    .expect("default config is valid")
}

fn bench_cached_get(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let pipeline = pipeline();
    runtime.block_on(async {
        pipeline.call("/profile", RequestOptions::get()).await.expect("warm cache");
    });

    c.bench_function("cached_get", |b| {
        b.to_async(&runtime).iter(|| async {
            pipeline.call("/profile", RequestOptions::get()).await.expect("cache hit")
        });
    });
}

fn bench_uncached_get(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let pipeline = pipeline();

    c.bench_function("uncached_get", |b| {
        b.to_async(&runtime).iter(|| async {
            pipeline
                .call("/profile", RequestOptions::get().bypass_cache())
                .await
                .expect("scripted success")
        });
    });
}

fn bench_mutation(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let pipeline = pipeline();

    c.bench_function("post_with_invalidation", |b| {
        b.to_async(&runtime).iter(|| async {
            pipeline
                .call("/profile", RequestOptions::post(serde_json::json!({"name": "Ada"})))
                .await
                .expect("scripted success")
        });
    });
}

criterion_group!(benches, bench_cached_get, bench_uncached_get, bench_mutation);
criterion_main!(benches);
