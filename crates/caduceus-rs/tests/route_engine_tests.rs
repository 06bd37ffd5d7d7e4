use caduceus_rs::config::routing::RoutingValidator;
use caduceus_rs::models::event::CloudEvent;
use caduceus_rs::models::route::RoutingConfig;
use caduceus_rs::services::router::{RouteDecision, RouteEngine};
use serde_json::json;

/// Routing document mirroring a production configuration: an urgent-order
/// content rule, a type rule, and a fallback.
const ROUTING_YAML: &str = r#"
metadata:
  version: "1.2"
  lastUpdated: "2025-06-01T00:00:00Z"
  description: "order routing"
settings:
  fallbackBehavior: fallback
  validateOnLoad: true
  dynamicReload: false
  reloadInterval: 30000
  enableMetrics: true
routes:
  - name: urgent-orders
    description: "fast-track urgent orders"
    enabled: true
    source: "*"
    type: "order.*"
    strategy: content
    priority: 9
    condition:
      field: "data.eventData.priority"
      operator: equals
      value: "urgent"
    destination:
      type: queue
      queue: orders.urgent
  - name: orders-to-procurement
    enabled: true
    source: "*"
    type: "order.*"
    strategy: type
    priority: 5
    destination:
      type: http
      method: POST
      endpoint: "http://procurement.internal/orders"
      timeout: 10000
  - name: fallback
    enabled: true
    source: "*"
    type: "*"
    strategy: fallback
    priority: 0
    destination:
      type: queue
      queue: interop.fallback
"#;

fn load_engine() -> RouteEngine {
    let config: RoutingConfig = serde_yaml::from_str(ROUTING_YAML).unwrap();
    let validation = RoutingValidator::validate(&config);
    assert!(validation.is_valid, "errors: {:?}", validation.errors);
    RouteEngine::new(config.routes)
}

fn order_event(priority: &str) -> CloudEvent {
    CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "order.created",
        "source": "smile.orders-service",
        "id": "e2",
        "data": {"eventData": {"orderId": "O1", "priority": priority}}
    }))
    .unwrap()
}

#[test]
fn test_urgent_order_takes_content_route() {
    let engine = load_engine();
    let decision = engine.find_matching_route(&order_event("urgent"));
    let route = decision.matched().expect("expected a match");
    assert_eq!(route.name, "urgent-orders");
    assert_eq!(route.destination.queue.as_deref(), Some("orders.urgent"));
}

#[test]
fn test_routine_order_takes_type_route() {
    let engine = load_engine();
    let decision = engine.find_matching_route(&order_event("routine"));
    assert_eq!(decision.matched().unwrap().name, "orders-to-procurement");
}

#[test]
fn test_unrelated_event_falls_back() {
    let engine = load_engine();
    let event = CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.vitals.recorded",
        "source": "smile.health-service",
        "id": "e3"
    }))
    .unwrap();
    let decision = engine.find_matching_route(&event);
    assert_eq!(decision.matched().unwrap().name, "fallback");
}

#[test]
fn test_no_match_without_fallback() {
    let config: RoutingConfig = serde_yaml::from_str(ROUTING_YAML).unwrap();
    let routes = config
        .routes
        .into_iter()
        .filter(|r| r.name != "fallback")
        .collect();
    let engine = RouteEngine::new(routes);

    let event = CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.vitals.recorded",
        "source": "smile.health-service",
        "id": "e4"
    }))
    .unwrap();

    match engine.find_matching_route(&event) {
        RouteDecision::NoMatch { source, event_type, .. } => {
            assert_eq!(source, "smile.health-service");
            assert_eq!(event_type, "health.vitals.recorded");
        }
        RouteDecision::Matched(route) => panic!("unexpected match: {}", route.name),
    }
}

#[test]
fn test_condition_yaml_operators_deserialize() {
    // camelCase operator spellings from the YAML surface.
    let yaml = r#"
field: "data.count"
operator: greaterThan
value: 5
"#;
    let condition: caduceus_rs::models::route::RouteCondition =
        serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        condition.operator,
        caduceus_rs::models::route::ConditionOperator::GreaterThan
    );
}
