//! Rule-based route selection for consumed events.
//!
//! Given a CloudEvent and a priority-ordered rule set, the engine returns
//! the first enabled rule whose source pattern, type pattern, and optional
//! content predicate all match.

use crate::models::event::CloudEvent;
use crate::models::route::{ConditionOperator, RouteCondition, RouteDefinition};
use crate::utils::{json_path, pattern::wildcard_match};
use log::debug;
use regex::Regex;
use serde_json::Value;

/// Outcome of a routing decision.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    Matched(RouteDefinition),
    NoMatch {
        source: String,
        event_type: String,
        reason: String,
    },
}

impl RouteDecision {
    pub fn matched(&self) -> Option<&RouteDefinition> {
        match self {
            RouteDecision::Matched(route) => Some(route),
            RouteDecision::NoMatch { .. } => None,
        }
    }
}

/// Priority-ordered route match engine.
///
/// Routes are sorted once at construction: priority descending with a
/// stable sort, so rules sharing a priority keep their configuration
/// order.
#[derive(Debug, Clone)]
pub struct RouteEngine {
    routes: Vec<RouteDefinition>,
}

impl RouteEngine {
    pub fn new(mut routes: Vec<RouteDefinition>) -> Self {
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Finds the highest-priority enabled route matching the event.
    pub fn find_matching_route(&self, event: &CloudEvent) -> RouteDecision {
        let doc = match serde_json::to_value(event) {
            Ok(doc) => doc,
            Err(e) => {
                return RouteDecision::NoMatch {
                    source: event.source.clone(),
                    event_type: event.event_type.clone(),
                    reason: format!("event not representable as JSON: {}", e),
                }
            }
        };

        for route in &self.routes {
            if !route.enabled {
                continue;
            }
            if !wildcard_match(&event.source, &route.source) {
                continue;
            }
            if !wildcard_match(&event.event_type, &route.event_type) {
                continue;
            }
            if let Some(condition) = &route.condition {
                if !evaluate_condition(condition, &doc) {
                    continue;
                }
            }
            debug!(
                "event {} matched route '{}' (priority {})",
                event.id, route.name, route.priority
            );
            return RouteDecision::Matched(route.clone());
        }

        RouteDecision::NoMatch {
            source: event.source.clone(),
            event_type: event.event_type.clone(),
            reason: format!(
                "no enabled route matches source '{}' and type '{}'",
                event.source, event.event_type
            ),
        }
    }
}

/// Evaluates a content predicate against the event document.
///
/// A missing field makes the predicate false, never an error.
pub fn evaluate_condition(condition: &RouteCondition, doc: &Value) -> bool {
    let Some(actual) = json_path::get(doc, &condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => actual == &condition.value,
        ConditionOperator::NotEquals => actual != &condition.value,
        ConditionOperator::GreaterThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(left), Some(right)) => left > right,
            _ => false,
        },
        ConditionOperator::LessThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(left), Some(right)) => left < right,
            _ => false,
        },
        ConditionOperator::Contains => match actual {
            Value::String(s) => condition
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            Value::Array(items) => items.contains(&condition.value),
            _ => false,
        },
        ConditionOperator::Regex => {
            let (Some(subject), Some(pattern)) = (actual.as_str(), condition.value.as_str())
            else {
                return false;
            };
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(regex) => regex.is_match(subject),
                Err(_) => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{DestinationType, RouteDestination, RouteStrategy};
    use serde_json::json;

    fn destination() -> RouteDestination {
        RouteDestination {
            destination_type: DestinationType::Queue,
            method: None,
            endpoint: None,
            timeout: None,
            headers: None,
            exchange: None,
            queue: Some("events.out".to_string()),
            routing_key: None,
        }
    }

    fn route(name: &str, source: &str, event_type: &str, priority: u8) -> RouteDefinition {
        RouteDefinition {
            name: name.to_string(),
            description: None,
            enabled: true,
            source: source.to_string(),
            event_type: event_type.to_string(),
            strategy: RouteStrategy::Hybrid,
            priority,
            condition: None,
            destination: destination(),
            transform: None,
            retry: None,
        }
    }

    fn event(source: &str, event_type: &str) -> CloudEvent {
        CloudEvent::from_json(json!({
            "specversion": "1.0",
            "type": event_type,
            "source": source,
            "id": "evt-1",
            "data": {"eventData": {"priority": "urgent", "amount": 12}}
        }))
        .unwrap()
    }

    #[test]
    fn test_highest_priority_wins() {
        let engine = RouteEngine::new(vec![
            route("low", "*", "order.*", 2),
            route("high", "*", "order.*", 9),
        ]);
        let decision = engine.find_matching_route(&event("svc", "order.created"));
        assert_eq!(decision.matched().unwrap().name, "high");
    }

    #[test]
    fn test_stable_order_for_equal_priorities() {
        let engine = RouteEngine::new(vec![
            route("first", "*", "*", 5),
            route("second", "*", "*", 5),
        ]);
        let decision = engine.find_matching_route(&event("svc", "order.created"));
        assert_eq!(decision.matched().unwrap().name, "first");
    }

    #[test]
    fn test_disabled_routes_skipped() {
        let mut disabled = route("disabled", "*", "*", 9);
        disabled.enabled = false;
        let engine = RouteEngine::new(vec![disabled, route("enabled", "*", "*", 1)]);
        let decision = engine.find_matching_route(&event("svc", "order.created"));
        assert_eq!(decision.matched().unwrap().name, "enabled");
    }

    #[test]
    fn test_no_match_names_source_and_type() {
        let engine = RouteEngine::new(vec![route("health-only", "*", "health.*", 5)]);
        match engine.find_matching_route(&event("svc", "order.created")) {
            RouteDecision::NoMatch {
                source,
                event_type,
                reason,
            } => {
                assert_eq!(source, "svc");
                assert_eq!(event_type, "order.created");
                assert!(reason.contains("order.created"));
            }
            RouteDecision::Matched(_) => panic!("expected no match"),
        }
    }

    #[test]
    fn test_condition_filters_route() {
        let mut conditional = route("urgent", "*", "order.*", 9);
        conditional.condition = Some(RouteCondition {
            field: "data.eventData.priority".to_string(),
            operator: ConditionOperator::Equals,
            value: json!("urgent"),
        });
        let engine = RouteEngine::new(vec![conditional, route("default", "*", "order.*", 5)]);

        let decision = engine.find_matching_route(&event("svc", "order.created"));
        assert_eq!(decision.matched().unwrap().name, "urgent");
    }

    #[test]
    fn test_greater_than_non_numeric_is_false() {
        let condition = RouteCondition {
            field: "data.eventData.priority".to_string(),
            operator: ConditionOperator::GreaterThan,
            value: json!(5),
        };
        let doc = json!({"data": {"eventData": {"priority": "urgent"}}});
        assert!(!evaluate_condition(&condition, &doc));
    }

    #[test]
    fn test_contains_on_arrays_and_strings() {
        let doc = json!({"data": {"tags": ["stat", "urgent"], "note": "patient stable"}});

        let array_condition = RouteCondition {
            field: "data.tags".to_string(),
            operator: ConditionOperator::Contains,
            value: json!("urgent"),
        };
        assert!(evaluate_condition(&array_condition, &doc));

        let string_condition = RouteCondition {
            field: "data.note".to_string(),
            operator: ConditionOperator::Contains,
            value: json!("stable"),
        };
        assert!(evaluate_condition(&string_condition, &doc));

        let number_condition = RouteCondition {
            field: "data.tags".to_string(),
            operator: ConditionOperator::Contains,
            value: json!(5),
        };
        assert!(!evaluate_condition(&number_condition, &doc));
    }

    #[test]
    fn test_regex_is_anchored() {
        let doc = json!({"data": {"code": "ABC-123"}});
        let matching = RouteCondition {
            field: "data.code".to_string(),
            operator: ConditionOperator::Regex,
            value: json!("[A-Z]+-\\d+"),
        };
        assert!(evaluate_condition(&matching, &doc));

        let partial = RouteCondition {
            field: "data.code".to_string(),
            operator: ConditionOperator::Regex,
            value: json!("\\d+"),
        };
        assert!(!evaluate_condition(&partial, &doc));
    }

    #[test]
    fn test_missing_field_is_false() {
        let condition = RouteCondition {
            field: "data.absent.node".to_string(),
            operator: ConditionOperator::Equals,
            value: json!("x"),
        };
        assert!(!evaluate_condition(&condition, &json!({"data": {}})));
    }
}
