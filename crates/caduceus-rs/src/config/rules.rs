//! Transformation rule loading and caching.
//!
//! Rules live one JSON file per rule in a directory, plus an optional
//! `custom/` subdirectory. The store keeps them in an in-memory cache
//! refreshed on a TTL window; a forced reload bypasses the cache.

use crate::models::error::InteropError;
use crate::models::transform::TransformationRule;
use ahash::HashMap as AHashMap;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default cache TTL.
pub const DEFAULT_RULE_TTL: Duration = Duration::from_secs(300);

struct CacheInner {
    rules: Vec<TransformationRule>,
    by_name: AHashMap<String, usize>,
    loaded_at: Instant,
}

/// TTL-cached transformation rule store.
pub struct RuleStore {
    dir: PathBuf,
    ttl: Duration,
    cache: RwLock<Option<CacheInner>>,
}

impl RuleStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Resolves a rule-relative path (e.g. an output schema) against the
    /// rule directory. Absolute paths pass through unchanged.
    pub fn resolve_path(&self, path: &str) -> String {
        let p = Path::new(path);
        if p.is_absolute() {
            path.to_string()
        } else {
            self.dir.join(p).to_string_lossy().into_owned()
        }
    }

    /// Forces a reload from disk, bypassing the TTL.
    pub async fn reload(&self) -> Result<usize, InteropError> {
        let loaded = load_rules_dir(&self.dir)?;
        let count = loaded.len();
        let by_name = loaded
            .iter()
            .enumerate()
            .map(|(index, rule)| (rule.name.clone(), index))
            .collect();
        *self.cache.write().await = Some(CacheInner {
            rules: loaded,
            by_name,
            loaded_at: Instant::now(),
        });
        info!("loaded {} transformation rules from {}", count, self.dir.display());
        Ok(count)
    }

    async fn ensure_fresh(&self) -> Result<(), InteropError> {
        let stale = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(inner) => inner.loaded_at.elapsed() >= self.ttl,
                None => true,
            }
        };
        if stale {
            debug!("rule cache stale, refreshing from {}", self.dir.display());
            self.reload().await?;
        }
        Ok(())
    }

    /// Looks a rule up by name; the rule must exist and be enabled.
    pub async fn rule_by_name(&self, name: &str) -> Result<TransformationRule, InteropError> {
        self.ensure_fresh().await?;
        let cache = self.cache.read().await;
        let inner = cache.as_ref().expect("cache populated by ensure_fresh");

        let rule = inner
            .by_name
            .get(name)
            .map(|index| &inner.rules[*index])
            .ok_or_else(|| InteropError::Transformation {
                rule: name.to_string(),
                message: "rule not found".to_string(),
            })?;

        if !rule.enabled {
            return Err(InteropError::Transformation {
                rule: name.to_string(),
                message: "rule is disabled".to_string(),
            });
        }
        Ok(rule.clone())
    }

    /// Selects the first enabled rule (insertion order) whose `eventType`
    /// equals the given type.
    pub async fn rule_for_event_type(
        &self,
        event_type: &str,
    ) -> Result<Option<TransformationRule>, InteropError> {
        self.ensure_fresh().await?;
        let cache = self.cache.read().await;
        let inner = cache.as_ref().expect("cache populated by ensure_fresh");

        Ok(inner
            .rules
            .iter()
            .find(|rule| rule.enabled && rule.event_type == event_type)
            .cloned())
    }

    pub async fn rule_count(&self) -> usize {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|inner| inner.rules.len())
            .unwrap_or(0)
    }
}

/// Reads every `*.json` rule file in the directory, then the `custom/`
/// subdirectory. Files are taken in name order so insertion order is
/// deterministic.
fn load_rules_dir(dir: &Path) -> Result<Vec<TransformationRule>, InteropError> {
    let mut rules = Vec::new();
    let mut duplicate_guard: AHashMap<String, PathBuf> = AHashMap::default();

    let mut dirs = vec![dir.to_path_buf()];
    let custom = dir.join("custom");
    if custom.is_dir() {
        dirs.push(custom);
    }

    for dir in dirs {
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            InteropError::Configuration(format!(
                "cannot read rule directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        for path in paths {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                InteropError::Configuration(format!(
                    "cannot read rule file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            let rule: TransformationRule = serde_json::from_str(&raw).map_err(|e| {
                InteropError::Configuration(format!(
                    "rule file '{}' is invalid: {}",
                    path.display(),
                    e
                ))
            })?;

            if let Some(previous) = duplicate_guard.insert(rule.name.clone(), path.clone()) {
                warn!(
                    "rule '{}' in {} shadows the one in {}",
                    rule.name,
                    path.display(),
                    previous.display()
                );
            }
            rules.push(rule);
        }
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_rule(dir: &Path, file: &str, name: &str, event_type: &str, enabled: bool) {
        let rule = json!({
            "name": name,
            "eventType": event_type,
            "targetFormat": "custom-json",
            "enabled": enabled,
            "mappings": [
                {"source": "$.data.patient.id", "target": "$.patientId"}
            ]
        });
        fs::write(dir.join(file), rule.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_loads_rules_from_directory() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "a.json", "patient-to-custom", "health.patient.registered", true);
        write_rule(dir.path(), "b.json", "order-to-custom", "order.created", true);

        let store = RuleStore::new(dir.path(), DEFAULT_RULE_TTL);
        assert_eq!(store.reload().await.unwrap(), 2);

        let rule = store.rule_by_name("patient-to-custom").await.unwrap();
        assert_eq!(rule.event_type, "health.patient.registered");
    }

    #[tokio::test]
    async fn test_disabled_rule_rejected_by_name() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "a.json", "off", "health.patient.registered", false);

        let store = RuleStore::new(dir.path(), DEFAULT_RULE_TTL);
        let result = store.rule_by_name("off").await;
        assert!(matches!(result, Err(InteropError::Transformation { .. })));
    }

    #[tokio::test]
    async fn test_event_type_selection_prefers_first_enabled() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "a.json", "disabled-first", "order.created", false);
        write_rule(dir.path(), "b.json", "winner", "order.created", true);
        write_rule(dir.path(), "c.json", "shadowed", "order.created", true);

        let store = RuleStore::new(dir.path(), DEFAULT_RULE_TTL);
        let rule = store.rule_for_event_type("order.created").await.unwrap().unwrap();
        assert_eq!(rule.name, "winner");
    }

    #[tokio::test]
    async fn test_custom_subdirectory_loaded_after_main() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "a.json", "main-rule", "order.created", true);
        let custom = dir.path().join("custom");
        fs::create_dir(&custom).unwrap();
        write_rule(&custom, "z.json", "custom-rule", "health.vitals.recorded", true);

        let store = RuleStore::new(dir.path(), DEFAULT_RULE_TTL);
        assert_eq!(store.reload().await.unwrap(), 2);
        assert!(store.rule_by_name("custom-rule").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_directory_is_configuration_error() {
        let store = RuleStore::new("/nonexistent/rules", DEFAULT_RULE_TTL);
        assert!(matches!(
            store.reload().await,
            Err(InteropError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_rule_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let store = RuleStore::new(dir.path(), DEFAULT_RULE_TTL);
        assert!(matches!(
            store.reload().await,
            Err(InteropError::Configuration(_))
        ));
    }
}
