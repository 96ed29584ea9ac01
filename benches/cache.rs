//! Cache benchmarks: lookup cost on the request hot path.
//!
//! Exact lookups should stay flat as the cache fills; semantic lookups scan
//! every entry, so their cost grows with `max_entries`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use llm_cost_engine::cache::{cache_key, ExactCache, SemanticCache};
use llm_cost_engine::config::{ExactMatchConfig, SemanticMatchConfig};
use llm_cost_engine::{
    CachedResponse, CostEngine, CostOptimizationConfig, CostRequestContext, EchoUpstream,
    TokenUsage, Upstream,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn response(i: usize) -> Arc<CachedResponse> {
    Arc::new(CachedResponse {
        content: format!("cached answer {i}"),
        model: "claude-sonnet-4".to_string(),
        token_usage: TokenUsage::new(10, 40),
    })
}

// ---------------------------------------------------------------------------
// Bench: ExactCache::get on a warm cache
// ---------------------------------------------------------------------------

fn bench_exact_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact_get");

    for size in [100usize, 1_000, 10_000] {
        let cache = ExactCache::new(&ExactMatchConfig {
            enabled: true,
            ttl_seconds: 3600,
            max_entries: size,
        });
        let keys: Vec<String> = (0..size)
            .map(|i| cache_key("claude-sonnet-4", &format!("prompt number {i}")))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            cache.put(key, response(i));
        }

        group.bench_with_input(BenchmarkId::new("entries", size), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(cache.get(black_box(&keys[i])))
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: SemanticCache::find_similar, full scan with no hit
// ---------------------------------------------------------------------------

fn bench_semantic_find_similar(c: &mut Criterion) {
    let mut group = c.benchmark_group("semantic_find_similar");
    group.sample_size(30);

    for size in [100usize, 1_000, 5_000] {
        let cache = SemanticCache::new(&SemanticMatchConfig {
            enabled: true,
            similarity_threshold: 0.999,
            ttl_seconds: 3600,
            max_entries: size,
        });
        for i in 0..size {
            cache.put(&format!("question {i} about topic {}", i % 17), response(i));
        }
        let query = cache.embed("an unrelated question nobody asked");

        group.bench_with_input(BenchmarkId::new("entries", size), &query, |b, query| {
            b.iter(|| black_box(cache.find_similar(black_box(query))))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: CostEngine::execute served from the exact cache
// ---------------------------------------------------------------------------

fn bench_engine_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut config = CostOptimizationConfig::default();
    config.time_based_routing.enabled = false;
    config.cache_policy.deduplication.enabled = false;
    config.budget_alerts.enabled = false;
    let engine = CostEngine::new(config);
    let upstream: Arc<dyn Upstream> = Arc::new(EchoUpstream::with_delay(
        std::time::Duration::ZERO,
    ));
    let ctx = CostRequestContext::new("What is the capital of France?");

    rt.block_on(async {
        let _ = engine.execute(ctx.clone(), Arc::clone(&upstream)).await;
    });

    c.bench_function("engine_execute_cache_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let result = engine.execute(ctx.clone(), Arc::clone(&upstream)).await;
            let _ = black_box(result);
        })
    });
}

criterion_group!(
    benches,
    bench_exact_get,
    bench_semantic_find_similar,
    bench_engine_cache_hit
);
criterion_main!(benches);
