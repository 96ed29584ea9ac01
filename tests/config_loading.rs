//! # Policy Directory Tests
//!
//! Loading the shipped `config/` samples, partial and malformed
//! directories, and reload semantics.

use std::path::{Path, PathBuf};

use llm_cost_engine::config::{
    export_schema, load_dir, validate, ConfigDocument, ConfigError, ConfigLoader,
};
use llm_cost_engine::{CostOptimizationConfig, PriorityTier};

fn shipped_config_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn write(dir: &Path, doc: ConfigDocument, body: &str) {
    std::fs::write(dir.join(doc.file_name()), body).expect("test: write policy document");
}

// ── Shipped samples ───────────────────────────────────────────────────────

#[test]
fn test_shipped_samples_load_without_substitution() {
    let report = load_dir(&shipped_config_dir());
    assert!(
        report.is_clean(),
        "substituted: {:?}",
        report
            .substituted
            .iter()
            .map(|(doc, e)| format!("{doc}: {e}"))
            .collect::<Vec<_>>()
    );
    assert!(validate(&report.config).is_ok());
}

#[test]
fn test_shipped_samples_differ_from_literal_defaults() {
    let report = load_dir(&shipped_config_dir());
    let config = report.config;
    assert!(!config.complexity_router.rules.is_empty());
    assert!(!config.priority_tiers.rules.is_empty());
    assert!(config.time_based_routing.enabled);
    assert!(config.rate_limit.enabled);
    assert!(!config.model_costs.models.is_empty());
}

// ── Partial and malformed directories ─────────────────────────────────────

#[test]
fn test_empty_dir_yields_literal_defaults() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let report = load_dir(dir.path());

    assert_eq!(report.config, CostOptimizationConfig::default());
    assert_eq!(report.substituted.len(), ConfigDocument::ALL.len());
    assert!(report
        .substituted
        .iter()
        .all(|(_, e)| matches!(e, ConfigError::Io { .. })));
}

#[test]
fn test_one_malformed_document_only_defaults_itself() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    write(
        dir.path(),
        ConfigDocument::RateLimit,
        r#"{"enabled": true, "requestsPerMinute": 5, "requestsPerHour": 50, "burstSize": 2}"#,
    );
    write(dir.path(), ConfigDocument::PriorityTiers, "{ not json");

    let report = load_dir(dir.path());
    assert_eq!(report.config.rate_limit.requests_per_minute, 5);
    assert_eq!(report.config.priority_tiers.default_tier, PriorityTier::Normal);

    let priority_failure = report
        .substituted
        .iter()
        .find(|(doc, _)| *doc == ConfigDocument::PriorityTiers)
        .expect("test: priority tiers substituted");
    assert!(matches!(priority_failure.1, ConfigError::Parse { .. }));
    assert!(!report
        .substituted
        .iter()
        .any(|(doc, _)| *doc == ConfigDocument::RateLimit));
}

#[test]
fn test_semantically_invalid_document_is_substituted() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    write(
        dir.path(),
        ConfigDocument::RateLimit,
        r#"{"enabled": true, "requestsPerMinute": 0, "requestsPerHour": 50, "burstSize": 2}"#,
    );

    let report = load_dir(dir.path());
    assert_eq!(
        report.config.rate_limit,
        CostOptimizationConfig::default().rate_limit
    );
    assert!(report
        .substituted
        .iter()
        .any(|(doc, _)| *doc == ConfigDocument::RateLimit));
}

// ── Reload ────────────────────────────────────────────────────────────────

#[test]
fn test_reload_keeps_last_good_document_when_edit_is_broken() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    write(
        dir.path(),
        ConfigDocument::RateLimit,
        r#"{"enabled": true, "requestsPerMinute": 7, "requestsPerHour": 70, "burstSize": 3}"#,
    );
    let loader = ConfigLoader::new(dir.path());
    let first = loader.load();
    assert_eq!(first.rate_limit.requests_per_minute, 7);

    write(dir.path(), ConfigDocument::RateLimit, "{\"enabled\": tru");
    let second = loader.reload();
    assert_eq!(second.rate_limit.requests_per_minute, 7);
    assert_eq!(loader.current().rate_limit.burst_size, 3);
}

#[test]
fn test_schema_export_names_every_document() {
    let schema = export_schema().expect("test: schema renders");
    for field in [
        "complexityRouter",
        "tokenBudget",
        "cachePolicy",
        "timeBasedRouting",
        "priorityTiers",
        "budgetAlerts",
        "modelCosts",
        "retryPolicy",
        "fallbackChain",
        "rateLimit",
    ] {
        assert!(schema.contains(field), "schema missing {field}");
    }
}
