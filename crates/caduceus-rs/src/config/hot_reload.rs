//! Routing configuration hot-reload.
//!
//! When `settings.dynamicReload` is enabled, the routing YAML is re-read on
//! `reloadInterval` whenever its modification time changes. Updates that
//! fail validation are discarded; consumers subscribe to a broadcast of
//! accepted updates.

use crate::config::routing::{load_routing_config, RoutingValidator};
use crate::models::route::RoutingConfig;
use log::{error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;

#[derive(Debug, Clone)]
pub struct RoutingUpdate {
    pub config: RoutingConfig,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

pub struct RoutingWatcher {
    current: Arc<RwLock<RoutingUpdate>>,
    config_path: String,
    update_sender: broadcast::Sender<RoutingUpdate>,
    version_counter: Arc<AtomicU64>,
}

impl RoutingWatcher {
    pub fn new(initial: RoutingConfig, config_path: String) -> Self {
        let (update_sender, _) = broadcast::channel(16);

        let initial_update = RoutingUpdate {
            config: initial,
            timestamp: chrono::Utc::now(),
            version: 1,
        };

        Self {
            current: Arc::new(RwLock::new(initial_update)),
            config_path,
            update_sender,
            version_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn current(&self) -> RoutingUpdate {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingUpdate> {
        self.update_sender.subscribe()
    }

    /// Spawns the polling task. The poll interval comes from the initial
    /// configuration's `reloadInterval`.
    pub async fn start_watching(&self) {
        let reload_interval = {
            let current = self.current.read().await;
            Duration::from_millis(current.config.settings.reload_interval.max(1_000))
        };
        let config_path = self.config_path.clone();
        let current = self.current.clone();
        let update_sender = self.update_sender.clone();
        let version_counter = self.version_counter.clone();

        tokio::spawn(async move {
            let mut ticker = interval(reload_interval);
            ticker.tick().await;
            let mut last_modified = file_modified_time(&config_path).await;

            loop {
                ticker.tick().await;

                match file_modified_time(&config_path).await {
                    Some(modified) => {
                        if Some(modified) != last_modified {
                            info!("routing configuration changed, reloading");
                            match reload_validated(&config_path) {
                                Ok(new_config) => {
                                    let version =
                                        version_counter.fetch_add(1, Ordering::Relaxed) + 1;
                                    let update = RoutingUpdate {
                                        config: new_config,
                                        timestamp: chrono::Utc::now(),
                                        version,
                                    };
                                    *current.write().await = update.clone();
                                    if update_sender.send(update).is_err() {
                                        warn!("no subscribers for routing update");
                                    } else {
                                        info!(
                                            "routing configuration reloaded (version {})",
                                            version
                                        );
                                    }
                                    last_modified = Some(modified);
                                }
                                Err(e) => {
                                    // Keep the previous config and retry on
                                    // the next change.
                                    error!("routing reload rejected: {}", e);
                                }
                            }
                        }
                    }
                    None => {
                        warn!("cannot stat routing config '{}'", config_path);
                    }
                }
            }
        });
    }

    /// Reloads immediately, bypassing the mtime check.
    pub async fn manual_reload(&self) -> Result<RoutingUpdate, String> {
        let new_config = reload_validated(&self.config_path)?;

        let version = self.version_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let update = RoutingUpdate {
            config: new_config,
            timestamp: chrono::Utc::now(),
            version,
        };
        *self.current.write().await = update.clone();
        let _ = self.update_sender.send(update.clone());

        info!("routing configuration manually reloaded (version {})", version);
        Ok(update)
    }
}

fn reload_validated(path: &str) -> Result<RoutingConfig, String> {
    let config = load_routing_config(path).map_err(|e| e.to_string())?;

    if config.settings.validate_on_load {
        let validation = RoutingValidator::validate(&config);
        if !validation.is_valid {
            return Err(format!(
                "routing validation failed: {}",
                validation.errors.join(", ")
            ));
        }
    }
    Ok(config)
}

async fn file_modified_time(path: &str) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{RoutingMetadata, RoutingSettings};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_config() -> RoutingConfig {
        RoutingConfig {
            metadata: RoutingMetadata {
                version: "1.0".to_string(),
                last_updated: "2025-06-01".to_string(),
                description: "test".to_string(),
            },
            settings: RoutingSettings::default(),
            routes: vec![],
        }
    }

    fn routing_yaml(version: &str) -> String {
        format!(
            r#"
metadata:
  version: "{}"
  lastUpdated: "2025-06-01"
  description: "reload test"
settings:
  validateOnLoad: false
routes:
  - name: fallback
    enabled: true
    source: "*"
    type: "*"
    strategy: fallback
    priority: 0
    destination:
      type: queue
      queue: interop.fallback
"#,
            version
        )
    }

    #[tokio::test]
    async fn test_watcher_starts_at_version_one() {
        let watcher = RoutingWatcher::new(test_config(), "unused.yaml".to_string());
        let current = watcher.current().await;
        assert_eq!(current.version, 1);
        assert_eq!(current.config.metadata.version, "1.0");
    }

    #[tokio::test]
    async fn test_manual_reload_picks_up_changes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(routing_yaml("2.0").as_bytes()).unwrap();
        file.flush().unwrap();

        let watcher = RoutingWatcher::new(
            test_config(),
            file.path().to_string_lossy().to_string(),
        );

        let update = watcher.manual_reload().await.unwrap();
        assert_eq!(update.version, 2);
        assert_eq!(update.config.metadata.version, "2.0");
        assert_eq!(update.config.routes.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_reload_rejects_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"routes: {{ nope").unwrap();
        file.flush().unwrap();

        let watcher = RoutingWatcher::new(
            test_config(),
            file.path().to_string_lossy().to_string(),
        );

        assert!(watcher.manual_reload().await.is_err());
        // The previous configuration stays in place.
        assert_eq!(watcher.current().await.version, 1);
    }
}
