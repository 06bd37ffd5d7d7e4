//! Caduceus Interop Layer service.
//!
//! Wires the event pipeline together: connects to the broker, starts the
//! queue consumers, routes and fans out consumed events, and serves the
//! health/stats HTTP endpoints. Startup fails fast on configuration
//! errors; shutdown is cooperative with a bounded grace period.

use caduceus_rs::config::clients::{load_clients_config, ClientsValidator};
use caduceus_rs::config::hot_reload::RoutingWatcher;
use caduceus_rs::config::routing::{load_routing_config, RoutingValidator};
use caduceus_rs::config::rules::{RuleStore, DEFAULT_RULE_TTL};
use caduceus_rs::config::settings::load_settings;
use caduceus_rs::logs::configure_logger;
use caduceus_rs::models::error::InteropError;
use caduceus_rs::models::route::{FallbackBehavior, RoutingSettings};
use caduceus_rs::routes::{admin, health, stats, PipelineState};
use caduceus_rs::services::circuit_breaker::CircuitBreakerRegistry;
use caduceus_rs::services::connection::{ConnectionManager, RetrySettings};
use caduceus_rs::services::consumer::{ConsumerConfig, EventConsumer, MessageHandler};
use caduceus_rs::services::fanout::ClientDispatcher;
use caduceus_rs::services::forwarder::RouteForwarder;
use caduceus_rs::services::openhim::{OpenHimBridge, OpenHimConfig};
use caduceus_rs::services::router::{RouteDecision, RouteEngine};
use caduceus_rs::services::transformer::TransformationEngine;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::RwLock;

const SERVICE_NAME: &str = "caduceus-interop";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = load_settings();
    info!("starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    // Routing configuration: structural failures and validation errors are
    // fatal.
    let routing_config = match load_routing_config(&settings.routing_config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("cannot load routing configuration: {}", e);
            std::process::exit(1);
        }
    };
    if routing_config.settings.validate_on_load {
        let validation = RoutingValidator::validate(&routing_config);
        if !validation.is_valid {
            error!("routing configuration validation failed:");
            for error in &validation.errors {
                error!("  - {}", error);
            }
            std::process::exit(1);
        }
    }

    // Clients configuration.
    let clients_file = match load_clients_config(&settings.clients_config_path) {
        Ok(file) => file,
        Err(e) => {
            error!("cannot load clients configuration: {}", e);
            std::process::exit(1);
        }
    };
    let clients_validation = ClientsValidator::validate(&clients_file);
    if !clients_validation.is_valid {
        error!("clients configuration validation failed:");
        for error in &clients_validation.errors {
            error!("  - {}", error);
        }
        std::process::exit(1);
    }

    // Transformation rules.
    let rule_store = Arc::new(RuleStore::new(settings.rules_dir.clone(), DEFAULT_RULE_TTL));
    match rule_store.reload().await {
        Ok(count) => info!("{} transformation rules loaded", count),
        Err(e) => {
            error!("cannot load transformation rules: {}", e);
            std::process::exit(1);
        }
    }

    // Broker connection.
    let manager = ConnectionManager::new(settings.broker_url.clone(), RetrySettings::default());
    if let Err(e) = manager.connect().await {
        error!("cannot connect to broker: {}", e);
        std::process::exit(1);
    }

    // The DLQ receives permanently failed messages via the default
    // exchange.
    if let Err(e) = manager.ensure_queue("interop.dlq").await {
        warn!("cannot declare dead-letter queue: {}", e);
    }
    if routing_config.settings.fallback_behavior == FallbackBehavior::Fallback {
        if let Err(e) = manager
            .ensure_queue(&routing_config.settings.fallback_queue)
            .await
        {
            warn!("cannot declare fallback queue: {}", e);
        }
    }

    // Delivery components.
    let breakers = Arc::new(CircuitBreakerRegistry::new(clients_file.breaker_settings()));
    let engine = Arc::new(TransformationEngine::new(rule_store.clone()));
    let dispatcher = Arc::new(ClientDispatcher::new(
        clients_file.clients.clone(),
        clients_file.global_settings.clone(),
        breakers.clone(),
        engine.clone(),
    ));
    let bridge = openhim_bridge_from_env();
    let forwarder = Arc::new(RouteForwarder::new(manager.clone(), bridge.clone()));

    // Routing state, swapped atomically on reload (periodic when
    // dynamicReload is set, manual via the admin endpoint either way).
    let routing_state = Arc::new(RwLock::new((
        RouteEngine::new(routing_config.routes.clone()),
        routing_config.settings.clone(),
    )));
    let watcher = Arc::new(RoutingWatcher::new(
        routing_config.clone(),
        settings.routing_config_path.clone(),
    ));
    if routing_config.settings.dynamic_reload {
        watcher.start_watching().await;
    }
    {
        let mut updates = watcher.subscribe();
        let reload_target = routing_state.clone();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                *reload_target.write().await = (
                    RouteEngine::new(update.config.routes),
                    update.config.settings,
                );
                info!("route engine rebuilt (config version {})", update.version);
            }
        });
    }

    let handler = build_handler(
        routing_state,
        forwarder.clone(),
        dispatcher.clone(),
        manager.clone(),
    );

    // Consumers for the two producer exchanges; failures land in the DLQ
    // via the default exchange.
    let mut consumers = Vec::new();
    for (queue, exchange, pattern) in [
        ("interop.health.queue", "health.events", "health.#"),
        ("interop.orders.queue", "orders.events", "orders.#"),
    ] {
        let mut config = ConsumerConfig::new(queue, exchange, pattern);
        config.prefetch = Some(settings.prefetch);
        config.dead_letter_exchange = Some(String::new());
        config.dead_letter_routing_key = Some("interop.dlq".to_string());
        let consumer = EventConsumer::new(manager.clone(), config);
        if let Err(e) = consumer.start(handler.clone()).await {
            error!("cannot start consumer on '{}': {}", queue, e);
            std::process::exit(1);
        }
        consumers.push(consumer);
    }

    let state = PipelineState {
        service_name: SERVICE_NAME.to_string(),
        manager: manager.clone(),
        consumers: consumers.clone(),
        breakers: breakers.clone(),
        dispatcher: Some(dispatcher.clone()),
        bridge: bridge.clone(),
        started_at: Instant::now(),
    };

    info!(
        "starting HTTP server on {}:{}",
        settings.http_host, settings.http_port
    );
    let watcher_data = watcher.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(actix_web::web::Data::new(state.clone()))
            .app_data(actix_web::web::Data::new(watcher_data.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
            .configure(health::configure_health)
            .configure(stats::configure_stats)
            .configure(admin::configure_admin)
    })
    .bind((settings.http_host.as_str(), settings.http_port))?
    .run();

    info!("{} started", SERVICE_NAME);

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Cooperative shutdown: stop deliveries, drain briefly, then tear the
    // broker link down. A hung shutdown is forced out non-zero.
    let grace = Duration::from_millis(settings.shutdown_grace_ms);
    let shutdown = async {
        for consumer in &consumers {
            consumer.stop().await;
        }
        tokio::time::sleep(grace).await;
        if let Err(e) = manager.disconnect().await {
            warn!("disconnect failed: {}", e);
        }
    };
    if tokio::time::timeout(grace + Duration::from_secs(5), shutdown)
        .await
        .is_err()
    {
        error!("shutdown timed out, forcing exit");
        std::process::exit(1);
    }

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

/// The per-message handler: route the event to its destination, then fan it
/// out to subscribed clients. Fan-out failures are already retried and
/// breaker-tracked per client, so they never nack the broker message.
///
/// Unrouted events follow `fallbackBehavior`: `fallback` republishes them
/// to the configured fallback queue, `drop` acks them, `error` nacks them
/// without requeue.
fn build_handler(
    routing_state: Arc<RwLock<(RouteEngine, RoutingSettings)>>,
    forwarder: Arc<RouteForwarder>,
    dispatcher: Arc<ClientDispatcher>,
    manager: Arc<ConnectionManager>,
) -> MessageHandler {
    Arc::new(move |event, context| {
        let routing_state = routing_state.clone();
        let forwarder = forwarder.clone();
        let dispatcher = dispatcher.clone();
        let manager = manager.clone();

        Box::pin(async move {
            debug!(
                "processing event {} (correlation {})",
                event.id, context.correlation_id
            );

            let report = dispatcher.dispatch(&event).await;
            if report.failed > 0 {
                warn!(
                    "event {}: {}/{} client deliveries failed",
                    event.id, report.failed, report.total
                );
            }

            let (decision, settings) = {
                let guard = routing_state.read().await;
                (guard.0.find_matching_route(&event), guard.1.clone())
            };

            match decision {
                RouteDecision::Matched(route) => forwarder.forward(&route, &event).await,
                RouteDecision::NoMatch {
                    source,
                    event_type,
                    reason,
                } => match settings.fallback_behavior {
                    FallbackBehavior::Fallback => {
                        manager
                            .publish_event("", &settings.fallback_queue, &event)
                            .await?;
                        info!(
                            "event {} republished to fallback queue '{}': {}",
                            event.id, settings.fallback_queue, reason
                        );
                        Ok(())
                    }
                    FallbackBehavior::Drop => {
                        info!("dropping unrouted event {}: {}", event.id, reason);
                        Ok(())
                    }
                    FallbackBehavior::Error => {
                        Err(InteropError::RouteNotFound { event_source: source, event_type })
                    }
                },
            }
        })
    })
}

fn openhim_bridge_from_env() -> Option<Arc<OpenHimBridge>> {
    if std::env::var("CADUCEUS_OPENHIM_ENABLED").as_deref() != Ok("true") {
        return None;
    }
    let mut config = OpenHimConfig::default();
    if let Ok(url) = std::env::var("CADUCEUS_OPENHIM_HEALTH_URL") {
        config.health_endpoint = url;
    }
    if let Ok(url) = std::env::var("CADUCEUS_OPENHIM_ORDERS_URL") {
        config.orders_endpoint = url;
    }
    if let Ok(url) = std::env::var("CADUCEUS_OPENHIM_DEFAULT_URL") {
        config.default_endpoint = url;
    }
    if let Ok(username) = std::env::var("CADUCEUS_OPENHIM_USERNAME") {
        config.username = username;
    }
    if let Ok(password) = std::env::var("CADUCEUS_OPENHIM_PASSWORD") {
        config.password = password;
    }
    info!("OpenHIM bridge enabled");
    Some(Arc::new(OpenHimBridge::new(config)))
}
