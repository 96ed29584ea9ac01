//! Policy directory hot-reload watcher.
//!
//! ## Responsibility
//! Watch the config directory for edits to any of the ten policy documents,
//! reload through the shared [`ConfigLoader`], and broadcast each new
//! snapshot to subscribers.
//!
//! ## Guarantees
//! - Only validated documents reach a broadcast snapshot; a broken edit keeps
//!   the last good copy of that document
//! - File watching is debounced to avoid rapid re-reads on multi-write editors
//! - Subscribers receive snapshots via a `broadcast` channel
//!
//! ## NOT Responsible For
//! - Rebuilding caches or trackers from a new snapshot (consumers decide)
//! - Initial config loading (that belongs to `loader`)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, Mutex};

use super::loader::ConfigLoader;
use super::validation::ConfigError;
use super::{ConfigDocument, CostOptimizationConfig};

/// Watches a policy directory and broadcasts reloaded snapshots.
///
/// # Panics
///
/// This type never panics.
pub struct ConfigWatcher {
    tx: broadcast::Sender<Arc<CostOptimizationConfig>>,
    /// Retained watcher handle; dropping it stops file watching.
    _watcher: Arc<Mutex<RecommendedWatcher>>,
    task: tokio::task::JoinHandle<()>,
}

fn is_policy_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(ConfigDocument::from_file_name)
        .is_some()
}

impl ConfigWatcher {
    /// Start watching `loader.dir()`.
    ///
    /// The initial snapshot is **not** broadcast; call
    /// [`ConfigLoader::load`] first.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError::Io)` if the file watcher cannot be created
    /// or the directory cannot be watched.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(
        loader: Arc<ConfigLoader>,
    ) -> Result<(Self, broadcast::Receiver<Arc<CostOptimizationConfig>>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let dir = loader.dir().to_path_buf();

        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::Io {
            file: dir.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Io {
                file: dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let watcher = Arc::new(Mutex::new(watcher));

        let tx_clone = tx.clone();
        let task = tokio::spawn(async move {
            let debounce = Duration::from_millis(500);
            let mut last_reload = std::time::Instant::now()
                .checked_sub(debounce)
                .unwrap_or_else(std::time::Instant::now);
            let mut pending = false;

            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;

                while let Ok(event) = notify_rx.try_recv() {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                        && event.paths.iter().any(|p| is_policy_file(p))
                    {
                        pending = true;
                    }
                }

                if pending && last_reload.elapsed() >= debounce {
                    pending = false;
                    last_reload = std::time::Instant::now();
                    let snapshot = loader.reload();
                    tracing::info!(dir = %loader.dir().display(), "policy directory reloaded");
                    // No receivers is fine; the loader already holds the snapshot.
                    let _ = tx_clone.send(snapshot);
                }
            }
        });

        Ok((
            Self {
                tx,
                _watcher: watcher,
                task,
            },
            rx,
        ))
    }

    /// Subscribe to snapshot notifications.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CostOptimizationConfig>> {
        self.tx.subscribe()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE_LIMIT_JSON: &str =
        r#"{"enabled": true, "requestsPerMinute": 30, "requestsPerHour": 500, "burstSize": 5}"#;

    #[test]
    fn test_is_policy_file_matches_known_names_only() {
        assert!(is_policy_file(Path::new("/x/rate-limit.json")));
        assert!(is_policy_file(Path::new("cache-policy.json")));
        assert!(!is_policy_file(Path::new("/x/notes.txt")));
        assert!(!is_policy_file(Path::new("/x/rate-limit.json.swp")));
    }

    #[tokio::test]
    async fn test_config_watcher_creation_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let loader = Arc::new(ConfigLoader::new(dir.path()));
        assert!(ConfigWatcher::new(loader).is_ok());
    }

    #[tokio::test]
    async fn test_config_watcher_nonexistent_dir_returns_error() {
        let loader = Arc::new(ConfigLoader::new("/definitely/nonexistent/dir"));
        assert!(ConfigWatcher::new(loader).is_err());
    }

    #[tokio::test]
    async fn test_config_watcher_broadcasts_reloaded_snapshot() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let loader = Arc::new(ConfigLoader::new(dir.path()));
        loader.load();

        let (_watcher, mut rx) = ConfigWatcher::new(Arc::clone(&loader)).expect("test: watcher");
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(dir.path().join("rate-limit.json"), RATE_LIMIT_JSON)
            .expect("test: write");

        let snapshot = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("test: update within 3s")
            .expect("test: recv");
        assert!(snapshot.rate_limit.enabled);
        assert_eq!(snapshot.rate_limit.burst_size, 5);
        assert_eq!(loader.current().rate_limit.burst_size, 5);
    }

    #[tokio::test]
    async fn test_config_watcher_ignores_unrelated_files() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let loader = Arc::new(ConfigLoader::new(dir.path()));

        let (_watcher, mut rx) = ConfigWatcher::new(loader).expect("test: watcher");
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(dir.path().join("README.txt"), "hello").expect("test: write");

        let result = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(result.is_err(), "unrelated files must not trigger a reload");
    }
}
