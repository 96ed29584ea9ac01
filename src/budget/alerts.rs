//! Budget alerts and their delivery channels.
//!
//! ## Responsibility
//! Turn a budget utilisation percentage into at most one alert (the highest
//! threshold crossed), suppress repeats inside the cooldown window, keep an
//! append-only history, and fan each alert out to every configured channel.
//!
//! ## Guarantees
//! - Recording an alert is synchronous; delivery is a separate async step
//! - Channel failures are logged at `warn` and never propagate
//! - Acknowledgement is the only mutation of a recorded alert
//!
//! ## NOT Responsible For
//! - Measuring utilisation (that belongs to `tracker`)
//! - Retrying failed deliveries

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{AlertChannelConfig, BudgetAlertConfig, ChannelKind};
use crate::types::AlertLevel;

/// Webhook request timeout.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// One emitted budget alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    /// Unique id.
    pub id: Uuid,
    /// Severity.
    pub level: AlertLevel,
    /// Human-readable message.
    pub message: String,
    /// Utilisation percentage (0-100) that triggered the alert.
    pub percent: f64,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Set by [`AlertEmitter::acknowledge`].
    pub acknowledged: bool,
}

impl BudgetAlert {
    /// New unacknowledged alert stamped `now`.
    pub fn new(level: AlertLevel, message: impl Into<String>, percent: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
            percent,
            timestamp: now,
            acknowledged: false,
        }
    }

    /// `[timestamp] [LEVEL    ] message (p.p%)`
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{:<9}] {} ({:.1}%)",
            self.timestamp.to_rfc3339(),
            self.level.as_str().to_uppercase(),
            self.message,
            self.percent
        )
    }

    fn cooldown_key(&self) -> String {
        let bucket = ((self.percent / 5.0).floor() * 5.0) as i64;
        format!("{}-{bucket}", self.level.as_str())
    }
}

/// Delivery failures. Logged by the emitter, never returned to callers.
#[derive(Error, Debug)]
pub enum AlertError {
    /// Writing the alert log failed.
    #[error("alert file {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The webhook request failed or returned a non-success status.
    #[error("alert webhook: {0}")]
    Http(#[from] reqwest::Error),
}

/// A destination for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Deliver one alert.
    async fn deliver(&self, alert: &BudgetAlert) -> Result<(), AlertError>;
}

// ============================================================================
// Console
// ============================================================================

/// Logs alerts through `tracing` at a level matching their severity.
pub struct ConsoleChannel;

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, alert: &BudgetAlert) -> Result<(), AlertError> {
        let line = alert.format_line();
        match alert.level {
            AlertLevel::Emergency | AlertLevel::Critical => {
                tracing::error!(alert_id = %alert.id, "{line}")
            }
            AlertLevel::Warning => tracing::warn!(alert_id = %alert.id, "{line}"),
            AlertLevel::Info => tracing::info!(alert_id = %alert.id, "{line}"),
        }
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// Appends one formatted line per alert.
///
/// A directory target gets a daily file `alerts-YYYY-MM-DD.log`; a file
/// target is appended to directly.
pub struct FileChannel {
    target: PathBuf,
    is_dir: bool,
}

impl FileChannel {
    /// Write daily files inside `dir`.
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            target: dir.into(),
            is_dir: true,
        }
    }

    /// Append to a single file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: path.into(),
            is_dir: false,
        }
    }

    /// Interpret a configured target: a trailing `/` names a directory.
    pub fn from_target(target: &str) -> Self {
        if target.ends_with('/') {
            Self::directory(target)
        } else {
            Self::file(target)
        }
    }

    /// Path the alert will be appended to.
    pub fn path_for(&self, alert: &BudgetAlert) -> PathBuf {
        if self.is_dir {
            self.target
                .join(format!("alerts-{}.log", alert.timestamp.format("%Y-%m-%d")))
        } else {
            self.target.clone()
        }
    }
}

#[async_trait]
impl AlertChannel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, alert: &BudgetAlert) -> Result<(), AlertError> {
        let path = self.path_for(alert);
        let io_err = |source| AlertError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        let line = format!("{}\n", alert.format_line());
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}

// ============================================================================
// Webhook
// ============================================================================

#[derive(Serialize)]
struct WebhookPayload<'a> {
    level: AlertLevel,
    message: &'a str,
    percent: f64,
    timestamp: DateTime<Utc>,
}

/// POSTs `{level, message, percent, timestamp}` as JSON.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookChannel {
    /// Channel posting to `url` with [`WEBHOOK_TIMEOUT`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: WEBHOOK_TIMEOUT,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &BudgetAlert) -> Result<(), AlertError> {
        let payload = WebhookPayload {
            level: alert.level,
            message: &alert.message,
            percent: alert.percent,
            timestamp: alert.timestamp,
        };
        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Build the channel a config entry describes.
///
/// File channels without a target write daily files into `default_dir`.
/// Webhooks without a target are skipped with a warning.
pub fn channel_from_config(
    config: &AlertChannelConfig,
    default_dir: &Path,
) -> Option<Arc<dyn AlertChannel>> {
    match (config.kind, config.target.as_deref()) {
        (ChannelKind::Console, _) => Some(Arc::new(ConsoleChannel)),
        (ChannelKind::File, Some(target)) => Some(Arc::new(FileChannel::from_target(target))),
        (ChannelKind::File, None) => Some(Arc::new(FileChannel::directory(default_dir))),
        (ChannelKind::Webhook, Some(url)) => Some(Arc::new(WebhookChannel::new(url))),
        (ChannelKind::Webhook, None) => {
            tracing::warn!("webhook alert channel has no target, skipping");
            None
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

#[derive(Default)]
struct EmitterState {
    alerts: Vec<BudgetAlert>,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

/// Threshold evaluation, cooldown, history, and fan-out delivery.
pub struct AlertEmitter {
    config: BudgetAlertConfig,
    channels: Vec<Arc<dyn AlertChannel>>,
    state: Mutex<EmitterState>,
}

impl AlertEmitter {
    /// Emitter delivering to the channels named in `config`.
    pub fn new(config: BudgetAlertConfig, alert_dir: &Path) -> Self {
        let channels = config
            .channels
            .iter()
            .filter_map(|c| channel_from_config(c, alert_dir))
            .collect();
        Self::with_channels(config, channels)
    }

    /// Emitter delivering to caller-supplied channels.
    pub fn with_channels(config: BudgetAlertConfig, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self {
            config,
            channels,
            state: Mutex::new(EmitterState::default()),
        }
    }

    /// Whether alerts are enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Append `alert` unless disabled or inside the cooldown for its key.
    ///
    /// Returns the recorded alert, which the caller should then deliver.
    pub fn record(&self, alert: BudgetAlert, now: DateTime<Utc>) -> Option<BudgetAlert> {
        if !self.config.enabled {
            return None;
        }
        let key = alert.cooldown_key();
        let cooldown = chrono::Duration::minutes(
            i64::try_from(self.config.cooldown_minutes).unwrap_or(i64::MAX / 60_000),
        );

        let mut state = self.state.lock();
        if let Some(last) = state.last_emitted.get(&key) {
            if now.signed_duration_since(*last) < cooldown {
                tracing::debug!(key = %key, "alert suppressed by cooldown");
                return None;
            }
        }
        state.last_emitted.insert(key, now);
        state.alerts.push(alert.clone());
        crate::metrics::inc_alert(alert.level.as_str());
        Some(alert)
    }

    /// Record an alert for the highest threshold `percent` has reached.
    ///
    /// Only that one threshold fires, subject to cooldown.
    pub fn check_threshold(&self, percent: f64, now: DateTime<Utc>) -> Option<BudgetAlert> {
        let mut thresholds: Vec<_> = self.config.thresholds.iter().collect();
        thresholds.sort_by(|a, b| b.percent.total_cmp(&a.percent));
        let threshold = thresholds.into_iter().find(|t| percent >= t.percent)?;
        let alert = BudgetAlert::new(threshold.level, threshold.message.clone(), percent, now);
        self.record(alert, now)
    }

    /// Deliver to every channel concurrently, logging failures.
    pub async fn deliver(&self, alert: &BudgetAlert) {
        let deliveries = self.channels.iter().map(|channel| async move {
            if let Err(e) = channel.deliver(alert).await {
                tracing::warn!(
                    channel = channel.name(),
                    alert_id = %alert.id,
                    error = %e,
                    "alert delivery failed"
                );
            }
        });
        futures::future::join_all(deliveries).await;
    }

    /// Record and deliver `alert`. Returns whether it passed the cooldown.
    pub async fn emit(&self, alert: BudgetAlert) -> bool {
        self.emit_at(alert, Utc::now()).await
    }

    /// [`emit`](Self::emit) against an explicit clock.
    pub async fn emit_at(&self, alert: BudgetAlert, now: DateTime<Utc>) -> bool {
        match self.record(alert, now) {
            Some(recorded) => {
                self.deliver(&recorded).await;
                true
            }
            None => false,
        }
    }

    /// Evaluate thresholds for `percent` and deliver the resulting alert.
    pub async fn check_and_emit_alerts(&self, percent: f64) -> Option<BudgetAlert> {
        let alert = self.check_threshold(percent, Utc::now())?;
        self.deliver(&alert).await;
        Some(alert)
    }

    /// Alert history, oldest first.
    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.state.lock().alerts.clone()
    }

    /// Mark an alert acknowledged; returns whether it was found.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Drop the history and every cooldown.
    pub fn clear_alerts(&self) {
        let mut state = self.state.lock();
        state.alerts.clear();
        state.last_emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertThreshold;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl AlertChannel for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _alert: &BudgetAlert) -> Result<(), AlertError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl AlertChannel for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _alert: &BudgetAlert) -> Result<(), AlertError> {
            Err(AlertError::Io {
                path: "/nowhere".into(),
                source: std::io::Error::other("boom"),
            })
        }
    }

    fn config() -> BudgetAlertConfig {
        BudgetAlertConfig {
            enabled: true,
            channels: vec![],
            thresholds: vec![
                AlertThreshold {
                    percent: 50.0,
                    level: AlertLevel::Info,
                    message: "half".into(),
                },
                AlertThreshold {
                    percent: 90.0,
                    level: AlertLevel::Critical,
                    message: "ninety".into(),
                },
                AlertThreshold {
                    percent: 75.0,
                    level: AlertLevel::Warning,
                    message: "three quarters".into(),
                },
            ],
            cooldown_minutes: 10,
        }
    }

    #[test]
    fn test_only_highest_crossed_threshold_fires() {
        let emitter = AlertEmitter::with_channels(config(), vec![]);
        let alert = emitter
            .check_threshold(92.0, Utc::now())
            .expect("test: alert");
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(emitter.alerts().len(), 1);
    }

    #[test]
    fn test_below_every_threshold_emits_nothing() {
        let emitter = AlertEmitter::with_channels(config(), vec![]);
        assert!(emitter.check_threshold(10.0, Utc::now()).is_none());
    }

    #[test]
    fn test_cooldown_suppresses_same_bucket() {
        let emitter = AlertEmitter::with_channels(config(), vec![]);
        let t0 = Utc::now();
        assert!(emitter.check_threshold(91.0, t0).is_some());
        assert!(emitter
            .check_threshold(93.0, t0 + chrono::Duration::minutes(1))
            .is_none());
        // A different five-point bucket has its own key.
        assert!(emitter
            .check_threshold(96.0, t0 + chrono::Duration::minutes(2))
            .is_some());
        // The original key fires again once the cooldown lapses.
        assert!(emitter
            .check_threshold(91.0, t0 + chrono::Duration::minutes(11))
            .is_some());
    }

    #[test]
    fn test_disabled_emitter_records_nothing() {
        let mut cfg = config();
        cfg.enabled = false;
        let emitter = AlertEmitter::with_channels(cfg, vec![]);
        assert!(emitter.check_threshold(99.0, Utc::now()).is_none());
        assert!(emitter.alerts().is_empty());
    }

    #[test]
    fn test_acknowledge_and_clear() {
        let emitter = AlertEmitter::with_channels(config(), vec![]);
        let alert = emitter
            .check_threshold(80.0, Utc::now())
            .expect("test: alert");
        assert!(emitter.acknowledge(alert.id));
        assert!(emitter.alerts()[0].acknowledged);
        assert!(!emitter.acknowledge(Uuid::new_v4()));

        emitter.clear_alerts();
        assert!(emitter.alerts().is_empty());
        assert!(emitter.check_threshold(80.0, Utc::now()).is_some());
    }

    #[test]
    fn test_format_line_pads_level() {
        let alert = BudgetAlert::new(AlertLevel::Warning, "msg", 81.0, Utc::now());
        assert!(alert.format_line().ends_with("[WARNING  ] msg (81.0%)"));
    }

    #[tokio::test]
    async fn test_emit_delivers_to_every_channel_despite_failures() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(Failing) as Arc<dyn AlertChannel>,
            counting.clone() as Arc<dyn AlertChannel>,
            counting.clone() as Arc<dyn AlertChannel>,
        ];
        let emitter = AlertEmitter::with_channels(config(), channels);

        let alert = BudgetAlert::new(AlertLevel::Warning, "x", 77.0, Utc::now());
        assert!(emitter.emit(alert).await);
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_file_channel_appends_daily_file() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let channel = FileChannel::directory(dir.path());
        let alert = BudgetAlert::new(AlertLevel::Critical, "over", 95.0, Utc::now());
        channel.deliver(&alert).await.expect("test: first write");
        channel.deliver(&alert).await.expect("test: second write");

        let path = channel.path_for(&alert);
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("alerts-") && n.ends_with(".log")));
        let content = std::fs::read_to_string(path).expect("test: read");
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("[CRITICAL ] over (95.0%)"));
    }

    #[test]
    fn test_channel_from_config_skips_webhook_without_target() {
        let dir = Path::new("/tmp");
        let webhook = AlertChannelConfig {
            kind: ChannelKind::Webhook,
            target: None,
        };
        assert!(channel_from_config(&webhook, dir).is_none());
        let console = AlertChannelConfig {
            kind: ChannelKind::Console,
            target: None,
        };
        assert_eq!(
            channel_from_config(&console, dir).map(|c| c.name().to_string()),
            Some("console".to_string())
        );
    }
}
