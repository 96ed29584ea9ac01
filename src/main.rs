//! Demo binary for llm-cost-engine
//!
//! Loads the policy directory, runs a handful of requests through the
//! engine against a local echo upstream, and prints the resulting budget
//! status, cache counters, and metrics rollup.
//!
//! ## Environment Variables
//!
//! - `COST_ENGINE_CONFIG_DIR`: policy directory (default: `./config`)
//! - `COST_ENGINE_STATE_DIR`: alert and metrics output (default: `./data`)
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter

use std::sync::Arc;
use std::time::Duration;

use llm_cost_engine::config::{validate, ConfigLoader, ConfigWatcher};
use llm_cost_engine::metrics::{self, RollupPeriod};
use llm_cost_engine::{
    init_tracing, CostEngine, CostRequestContext, EchoUpstream, PriorityTier, Upstream,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config_dir =
        std::env::var("COST_ENGINE_CONFIG_DIR").unwrap_or_else(|_| "./config".to_string());
    let state_dir =
        std::env::var("COST_ENGINE_STATE_DIR").unwrap_or_else(|_| "./data".to_string());

    let loader = Arc::new(ConfigLoader::new(&config_dir));
    let config = loader.load();
    if let Err(errors) = validate(&config) {
        for e in errors {
            warn!(error = %e, "policy snapshot has problems");
        }
    }

    // Keep the watcher alive for the demo's lifetime.
    let _watcher = match ConfigWatcher::new(Arc::clone(&loader)) {
        Ok((watcher, mut rx)) => {
            tokio::spawn(async move {
                while let Ok(snapshot) = rx.recv().await {
                    info!(
                        default_model = %snapshot.complexity_router.default_model,
                        "policy snapshot reloaded"
                    );
                }
            });
            Some(watcher)
        }
        Err(e) => {
            warn!(error = %e, dir = %config_dir, "hot reload disabled");
            None
        }
    };

    let engine = CostEngine::builder(config).state_dir(&state_dir).build();
    let maintenance = engine.spawn_maintenance(Duration::from_secs(60));
    let upstream: Arc<dyn Upstream> = Arc::new(EchoUpstream::with_delay(Duration::from_millis(20)));

    let demo_requests = vec![
        CostRequestContext::new("What is the capital of France?"),
        CostRequestContext::new("Explain how authentication works in a web application")
            .with_task_type("explain"),
        CostRequestContext::new("Write a haiku about programming").with_source("marketing"),
        CostRequestContext::new("What is the capital of France?"),
        CostRequestContext::new("Design a multi-region database architecture, step 1: ...")
            .with_priority(PriorityTier::High),
        CostRequestContext::new("Summarize this week's changelog")
            .with_model("claude-haiku-3-5")
            .with_priority(PriorityTier::Batch),
    ];

    info!(count = demo_requests.len(), "sending demo requests");

    // Two identical requests in flight at once share one upstream call.
    let twin = CostRequestContext::new("How does photosynthesis work?");
    let (a, b) = tokio::join!(
        engine.execute(twin.clone(), Arc::clone(&upstream)),
        engine.execute(twin, Arc::clone(&upstream)),
    );
    for outcome in [a, b] {
        match outcome {
            Ok(r) => info!(source = ?r.source, model = %r.model, "twin request served"),
            Err(e) => error!(error = %e, "twin request failed"),
        }
    }

    for ctx in demo_requests {
        match engine.execute(ctx, Arc::clone(&upstream)).await {
            Ok(response) => info!(
                request_id = %response.request_id,
                model = %response.model,
                source = ?response.source,
                cost = response.cost,
                latency_ms = response.latency_ms,
                "request served"
            ),
            Err(e) => warn!(error = %e, "request not served"),
        }
    }

    let status = engine.budget_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("{}", serde_json::to_string_pretty(&engine.cache_stats())?);
    println!(
        "{}",
        serde_json::to_string_pretty(&engine.rollup(RollupPeriod::Hourly))?
    );

    match engine.persist_metrics().await {
        Ok(written) => info!(written, dir = %state_dir, "metrics persisted"),
        Err(e) => error!(error = %e, "metrics persist failed"),
    }

    maintenance.abort();
    info!("demo complete");
    Ok(())
}
