//! Per-client circuit breakers for downstream delivery protection.
//!
//! Each downstream client gets a breaker that opens after a configured
//! number of consecutive delivery failures and stays open for a cool-down
//! period. While open, the client is skipped entirely by fan-out; once the
//! cool-down elapses the breaker is reset and the client becomes eligible
//! again.

use crate::models::stats::CircuitBreakerSnapshot;
use ahash::HashMap as AHashMap;
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Consecutive failures required to open the breaker.
    pub threshold: u32,
    /// Cool-down before the client becomes eligible again.
    pub timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    is_open: bool,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
}

/// Concurrent table of breaker states keyed by client id.
///
/// Mutated by fan-out on delivery outcomes and read during client
/// selection.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    settings: CircuitBreakerSettings,
    breakers: RwLock<AHashMap<String, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            breakers: RwLock::new(AHashMap::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Returns true when the client may be attempted.
    ///
    /// An open breaker whose cool-down has elapsed is reset here, making the
    /// client eligible again; while still cooling down, the skip is not
    /// recorded as a new failure.
    pub async fn allow(&self, client_id: &str) -> bool {
        if !self.settings.enabled {
            return true;
        }

        {
            let breakers = self.breakers.read().await;
            match breakers.get(client_id) {
                None => return true,
                Some(state) if !state.is_open => return true,
                Some(state) => {
                    if let Some(next_attempt) = state.next_attempt_time {
                        if Instant::now() < next_attempt {
                            return false;
                        }
                    }
                }
            }
        }

        // Cool-down elapsed: reset before the caller attempts delivery.
        let mut breakers = self.breakers.write().await;
        if let Some(state) = breakers.get_mut(client_id) {
            if state.is_open {
                let still_cooling = state
                    .next_attempt_time
                    .map(|t| Instant::now() < t)
                    .unwrap_or(false);
                if still_cooling {
                    return false;
                }
                info!("circuit for client '{}' cool-down elapsed, resetting", client_id);
                *state = BreakerState::default();
            }
        }
        true
    }

    /// Clears the failure count and closes the breaker if it was open.
    pub async fn record_success(&self, client_id: &str) {
        if !self.settings.enabled {
            return;
        }
        let mut breakers = self.breakers.write().await;
        let state = breakers.entry(client_id.to_string()).or_default();
        if state.is_open {
            info!("circuit for client '{}' closed after successful delivery", client_id);
        }
        *state = BreakerState::default();
    }

    /// Counts one failure; opens the breaker when the threshold is reached.
    pub async fn record_failure(&self, client_id: &str) {
        if !self.settings.enabled {
            return;
        }
        let mut breakers = self.breakers.write().await;
        let state = breakers.entry(client_id.to_string()).or_default();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        if !state.is_open && state.failure_count >= self.settings.threshold {
            state.is_open = true;
            state.next_attempt_time = Some(Instant::now() + self.settings.timeout);
            warn!(
                "circuit for client '{}' opened after {} consecutive failures (cool-down {}ms)",
                client_id,
                state.failure_count,
                self.settings.timeout.as_millis()
            );
        }
    }

    pub async fn is_open(&self, client_id: &str) -> bool {
        self.breakers
            .read()
            .await
            .get(client_id)
            .map(|s| s.is_open)
            .unwrap_or(false)
    }

    /// Point-in-time view of every tracked breaker.
    pub async fn snapshot(&self) -> Vec<CircuitBreakerSnapshot> {
        let now = Instant::now();
        let breakers = self.breakers.read().await;
        let mut snapshots: Vec<CircuitBreakerSnapshot> = breakers
            .iter()
            .map(|(id, state)| CircuitBreakerSnapshot {
                client_id: id.clone(),
                is_open: state.is_open,
                failure_count: state.failure_count,
                last_failure_ms_ago: state
                    .last_failure_time
                    .map(|t| now.duration_since(t).as_millis() as u64),
                cooldown_remaining_ms: state
                    .next_attempt_time
                    .and_then(|t| t.checked_duration_since(now))
                    .map(|d| d.as_millis() as u64),
            })
            .collect();
        snapshots.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn registry(threshold: u32, timeout_ms: u64) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerSettings {
            enabled: true,
            threshold,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let registry = registry(3, 1000);

        registry.record_failure("c1").await;
        registry.record_failure("c1").await;
        assert!(!registry.is_open("c1").await);
        assert!(registry.allow("c1").await);

        registry.record_failure("c1").await;
        assert!(registry.is_open("c1").await);
        assert!(!registry.allow("c1").await);
    }

    #[tokio::test]
    async fn test_success_resets_count() {
        let registry = registry(3, 1000);

        registry.record_failure("c1").await;
        registry.record_failure("c1").await;
        registry.record_success("c1").await;
        registry.record_failure("c1").await;
        registry.record_failure("c1").await;
        assert!(!registry.is_open("c1").await);
    }

    #[tokio::test]
    async fn test_cooldown_elapse_resets() {
        let registry = registry(1, 50);

        registry.record_failure("c1").await;
        assert!(!registry.allow("c1").await);

        sleep(Duration::from_millis(80)).await;
        assert!(registry.allow("c1").await);
        assert!(!registry.is_open("c1").await);
    }

    #[tokio::test]
    async fn test_breakers_are_per_client() {
        let registry = registry(1, 1000);

        registry.record_failure("c1").await;
        assert!(!registry.allow("c1").await);
        assert!(registry.allow("c2").await);
    }

    #[tokio::test]
    async fn test_disabled_registry_always_allows() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerSettings {
            enabled: false,
            threshold: 1,
            timeout: Duration::from_secs(60),
        });

        registry.record_failure("c1").await;
        registry.record_failure("c1").await;
        assert!(registry.allow("c1").await);
    }

    #[tokio::test]
    async fn test_snapshot_reports_open_state() {
        let registry = registry(1, 10_000);
        registry.record_failure("c1").await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].client_id, "c1");
        assert!(snapshot[0].is_open);
        assert!(snapshot[0].cooldown_remaining_ms.unwrap() > 0);
    }
}
