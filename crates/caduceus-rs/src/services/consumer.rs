//! CloudEvent consumption from one queue binding.
//!
//! An [`EventConsumer`] owns a single (queue, exchange, routing-pattern)
//! binding: it declares the topology, translates broker messages into
//! validated CloudEvents, deduplicates, dispatches to the user handler, and
//! is the exclusive owner of the ack/nack decision.

use crate::models::error::InteropError;
use crate::models::event::{
    resolve_correlation_id, CloudEvent, MessageEnvelope, ProcessingContext,
};
use crate::models::stats::ConsumerStats;
use crate::services::connection::ConnectionManager;
use chrono::Utc;
use futures::future::BoxFuture;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// Exchange types supported by the consumer topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Topic,
    Direct,
    Fanout,
    Headers,
}

impl ExchangeType {
    fn kind(self) -> ExchangeKind {
        match self {
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Headers => ExchangeKind::Headers,
        }
    }
}

/// Configuration for one queue binding.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub exchange: String,
    pub exchange_type: ExchangeType,
    pub routing_pattern: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub prefetch: Option<u16>,
    pub message_ttl_ms: Option<u32>,
    pub max_length: Option<u32>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    /// Requeue on handler failure instead of dead-lettering.
    pub requeue_on_failure: bool,
    pub enable_deduplication: bool,
    pub deduplication_window: Duration,
    /// Allow up to `max_parallel` in-flight handlers instead of one at a
    /// time. Bounded in practice by the broker prefetch count.
    pub parallel: bool,
    pub max_parallel: usize,
}

impl ConsumerConfig {
    pub fn new(queue: &str, exchange: &str, routing_pattern: &str) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            exchange_type: ExchangeType::Topic,
            routing_pattern: routing_pattern.to_string(),
            durable: true,
            auto_delete: false,
            prefetch: Some(10),
            message_ttl_ms: None,
            max_length: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
            requeue_on_failure: false,
            enable_deduplication: true,
            deduplication_window: Duration::from_secs(60),
            parallel: false,
            max_parallel: 1,
        }
    }
}

/// Handler invoked for each validated, non-duplicate event.
pub type MessageHandler = Arc<
    dyn Fn(CloudEvent, ProcessingContext) -> BoxFuture<'static, Result<(), InteropError>>
        + Send
        + Sync,
>;

/// Message-id deduplication with a sliding window.
///
/// Single-writer in practice (the consumer loop); entries older than the
/// window are purged by a periodic sweep.
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    seen: StdMutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns true when `id` was already seen inside the window; records
    /// the first sighting otherwise.
    pub fn check_and_record(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup cache poisoned");
        let now = Instant::now();
        match seen.get(id) {
            Some(first_seen) if now.duration_since(*first_seen) < self.window => true,
            _ => {
                seen.insert(id.to_string(), now);
                false
            }
        }
    }

    /// Removes entries older than the window. Returns how many were purged.
    pub fn sweep(&self) -> usize {
        let mut seen = self.seen.lock().expect("dedup cache poisoned");
        let now = Instant::now();
        let before = seen.len();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.window);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    consumed: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    duplicates: AtomicU64,
    started_at: StdMutex<Option<(Instant, chrono::DateTime<Utc>)>>,
}

/// One queue consumer bound to a connection manager.
pub struct EventConsumer {
    manager: Arc<ConnectionManager>,
    config: ConsumerConfig,
    stats: Arc<StatsInner>,
    dedup: Arc<DedupCache>,
    active: Arc<AtomicBool>,
    channel: Mutex<Option<Channel>>,
    consumer_tag: StdMutex<Option<String>>,
}

impl EventConsumer {
    pub fn new(manager: Arc<ConnectionManager>, config: ConsumerConfig) -> Arc<Self> {
        let dedup = Arc::new(DedupCache::new(config.deduplication_window));
        Arc::new(Self {
            manager,
            config,
            stats: Arc::new(StatsInner::default()),
            dedup,
            active: Arc::new(AtomicBool::new(false)),
            channel: Mutex::new(None),
            consumer_tag: StdMutex::new(None),
        })
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Declares the topology and begins consuming.
    ///
    /// Fails with *already active* on a double start. The channel comes
    /// from the connection manager and stays owned by it.
    pub async fn start(self: &Arc<Self>, handler: MessageHandler) -> Result<(), InteropError> {
        if self.active.load(Ordering::SeqCst) {
            return Err(InteropError::ConsumerAlreadyActive(self.config.queue.clone()));
        }

        let channel = self.manager.get_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                self.config.exchange_type.kind(),
                ExchangeDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: self.config.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| InteropError::Channel(format!("exchange declare failed: {}", e)))?;

        let mut queue_args = FieldTable::default();
        if let Some(ttl) = self.config.message_ttl_ms {
            queue_args.insert("x-message-ttl".into(), AMQPValue::LongUInt(ttl));
        }
        if let Some(max_length) = self.config.max_length {
            queue_args.insert("x-max-length".into(), AMQPValue::LongUInt(max_length));
        }
        if let Some(dlx) = &self.config.dead_letter_exchange {
            queue_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.clone().into()),
            );
        }
        if let Some(dlrk) = &self.config.dead_letter_routing_key {
            queue_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(dlrk.clone().into()),
            );
        }

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: self.config.auto_delete,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .map_err(|e| InteropError::Channel(format!("queue declare failed: {}", e)))?;

        channel
            .queue_bind(
                &self.config.queue,
                &self.config.exchange,
                &self.config.routing_pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| InteropError::Channel(format!("queue bind failed: {}", e)))?;

        if let Some(prefetch) = self.config.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| InteropError::Channel(format!("basic_qos failed: {}", e)))?;
        }

        let tag = format!("{}-{}", self.config.queue, Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| InteropError::Channel(format!("basic_consume failed: {}", e)))?;

        self.active.store(true, Ordering::SeqCst);
        *self.stats.started_at.lock().expect("stats poisoned") =
            Some((Instant::now(), Utc::now()));
        *self.channel.lock().await = Some(channel);
        *self.consumer_tag.lock().expect("tag poisoned") = Some(tag.clone());

        info!(
            "consumer started on queue '{}' (exchange '{}', pattern '{}')",
            self.config.queue, self.config.exchange, self.config.routing_pattern
        );

        self.spawn_message_loop(consumer, tag, handler);
        self.spawn_dedup_sweeper();
        Ok(())
    }

    fn spawn_message_loop(
        self: &Arc<Self>,
        mut consumer: lapin::Consumer,
        tag: String,
        handler: MessageHandler,
    ) {
        let this = self.clone();
        let limiter = Arc::new(Semaphore::new(if this.config.parallel {
            this.config.max_parallel.max(1)
        } else {
            1
        }));

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                if !this.active.load(Ordering::SeqCst) {
                    break;
                }
                match delivery {
                    Ok(delivery) => {
                        let permit = limiter
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("semaphore closed");
                        let worker = this.clone();
                        let handler = handler.clone();
                        let tag = tag.clone();
                        tokio::spawn(async move {
                            worker.process_delivery(delivery, &tag, handler).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(
                            "error receiving on queue '{}': {}",
                            this.config.queue, e
                        );
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            debug!("message loop ended for queue '{}'", this.config.queue);
        });
    }

    fn spawn_dedup_sweeper(self: &Arc<Self>) {
        if !self.config.enable_deduplication {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            // Sweep interval equals the deduplication window.
            let mut interval = tokio::time::interval(this.config.deduplication_window);
            interval.tick().await;
            while this.active.load(Ordering::SeqCst) {
                interval.tick().await;
                let purged = this.dedup.sweep();
                if purged > 0 {
                    debug!(
                        "purged {} deduplication entries on queue '{}'",
                        purged, this.config.queue
                    );
                }
            }
        });
    }

    async fn process_delivery(&self, delivery: Delivery, tag: &str, handler: MessageHandler) {
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);

        // 1. Decode: malformed payloads are permanent failures.
        let document: Value = match serde_json::from_slice(&delivery.data) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "malformed message on queue '{}': {}",
                    self.config.queue, e
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.reject(delivery, false).await;
                return;
            }
        };

        // 2. Validate the CloudEvent envelope.
        let event = match CloudEvent::from_json(document) {
            Ok(event) => event,
            Err(reason) => {
                warn!(
                    "invalid CloudEvent on queue '{}': {}",
                    self.config.queue, reason
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.reject(delivery, false).await;
                return;
            }
        };

        // 3. Deduplicate by event id within the window.
        if self.config.enable_deduplication && self.dedup.check_and_record(&event.id) {
            debug!("duplicate event '{}' acknowledged without processing", event.id);
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            self.ack(delivery).await;
            return;
        }

        // 4. Build the processing context.
        let envelope = MessageEnvelope {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            timestamp: *delivery.properties.timestamp(),
        };
        let context = ProcessingContext {
            correlation_id: resolve_correlation_id(&event, &envelope),
            queue: self.config.queue.clone(),
            consumer_tag: tag.to_string(),
            received_at: Utc::now(),
        };

        // 5. Hand off to the handler; the outcome decides the ack.
        let event_id = event.id.clone();
        match handler(event, context).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                self.ack(delivery).await;
            }
            Err(e) => {
                warn!(
                    "handler failed for event '{}' on queue '{}': {}",
                    event_id, self.config.queue, e
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.reject(delivery, self.config.requeue_on_failure).await;
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("ack failed on queue '{}': {}", self.config.queue, e);
        }
    }

    async fn reject(&self, delivery: Delivery, requeue: bool) {
        if !requeue && self.config.dead_letter_exchange.is_some() {
            self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
        if let Err(e) = delivery
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
        {
            error!("nack failed on queue '{}': {}", self.config.queue, e);
        }
    }

    /// Cancels the consumer by tag. Never closes the channel (the manager
    /// owns it) and never returns an error.
    pub async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);

        let tag = self.consumer_tag.lock().expect("tag poisoned").take();
        if let Some(tag) = tag {
            let channel = self.channel.lock().await.clone();
            if let Some(channel) = channel {
                if let Err(e) = channel
                    .basic_cancel(&tag, BasicCancelOptions::default())
                    .await
                {
                    warn!(
                        "cancel of consumer '{}' on queue '{}' failed: {}",
                        tag, self.config.queue, e
                    );
                }
            }
        }
        info!("consumer stopped on queue '{}'", self.config.queue);
    }

    /// Whole-struct snapshot of the counters, safe to read while the
    /// message loop is running.
    pub fn stats(&self) -> ConsumerStats {
        let started = *self.stats.started_at.lock().expect("stats poisoned");
        let uptime_seconds = started
            .map(|(instant, _)| instant.elapsed().as_secs())
            .unwrap_or(0);
        let processed = self.stats.processed.load(Ordering::Relaxed);
        let messages_per_second = if uptime_seconds > 0 {
            processed as f64 / uptime_seconds as f64
        } else {
            0.0
        };

        ConsumerStats {
            queue: self.config.queue.clone(),
            messages_consumed: self.stats.consumed.load(Ordering::Relaxed),
            messages_processed: processed,
            messages_failed: self.stats.failed.load(Ordering::Relaxed),
            messages_dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
            messages_duplicate: self.stats.duplicates.load(Ordering::Relaxed),
            started_at: started.map(|(_, at)| at.to_rfc3339()),
            uptime_seconds,
            messages_per_second,
            active: self.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_first_sight_is_not_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(60));
        assert!(!cache.check_and_record("dup-1"));
        assert!(cache.check_and_record("dup-1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dedup_expires_after_window() {
        let cache = DedupCache::new(Duration::from_millis(10));
        assert!(!cache.check_and_record("m1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.check_and_record("m1"));
    }

    #[test]
    fn test_dedup_sweep_purges_old_entries() {
        let cache = DedupCache::new(Duration::from_millis(10));
        cache.check_and_record("old");
        std::thread::sleep(Duration::from_millis(20));
        cache.check_and_record("fresh");
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let manager = crate::services::connection::ConnectionManager::new(
            "amqp://localhost".to_string(),
            Default::default(),
        );
        let consumer = EventConsumer::new(
            manager,
            ConsumerConfig::new("interop.health.queue", "health.events", "health.#"),
        );
        let handler: MessageHandler = Arc::new(|_, _| Box::pin(async { Ok(()) }));
        let result = consumer.start(handler).await;
        assert!(matches!(result, Err(InteropError::NotConnected)));
        assert!(!consumer.is_active());
    }

    #[tokio::test]
    async fn test_stats_snapshot_defaults() {
        let manager = crate::services::connection::ConnectionManager::new(
            "amqp://localhost".to_string(),
            Default::default(),
        );
        let consumer = EventConsumer::new(
            manager,
            ConsumerConfig::new("interop.orders.queue", "orders.events", "orders.#"),
        );
        let stats = consumer.stats();
        assert_eq!(stats.queue, "interop.orders.queue");
        assert_eq!(stats.messages_consumed, 0);
        assert!(!stats.active);
        assert!(stats.started_at.is_none());
    }
}
