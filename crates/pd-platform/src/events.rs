//! Domain events and the event-type registry.
//!
//! Events represent facts about what happened in the domain (past tense) and
//! are named `{aggregate}.{action}`, e.g. `competition.created`. Aggregates
//! collect them in memory during mutation; the command handler flushes them
//! to the outbox store immediately before commit.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use pd_common::{CoreError, Result};

/// An event recorded by an aggregate, not yet persisted.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Predicate checking an event payload against its expected shape.
pub type PayloadCheck = fn(&serde_json::Value) -> bool;

/// Explicit startup-populated mapping from event-type strings to payload
/// schemas. Appending an event of an unregistered type fails the whole
/// business operation, so a typo'd event type can never reach the broker.
pub struct EventTypeRegistry {
    checks: HashMap<String, PayloadCheck>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn register(&mut self, event_type: impl Into<String>, check: PayloadCheck) {
        self.checks.insert(event_type.into(), check);
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.checks.contains_key(event_type)
    }

    pub fn validate(&self, event: &DomainEvent) -> Result<()> {
        let check = self.checks.get(&event.event_type).ok_or_else(|| {
            CoreError::outbox_append(format!("unregistered event type: {}", event.event_type))
        })?;
        if !check(&event.payload) {
            return Err(CoreError::outbox_append(format!(
                "payload schema check failed for {}",
                event.event_type
            )));
        }
        Ok(())
    }

    /// Registry for the platform's own event types.
    pub fn platform_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("competition.created", |p| {
            p.get("name").map_or(false, |v| v.is_string())
        });
        registry.register("competition.registration_opened", |p| p.is_object());
        registry.register("competition.registration_closed", |p| p.is_object());
        registry.register("entry.submitted", |p| {
            p.get("competition_id").map_or(false, |v| v.is_string())
                && p.get("competitor").map_or(false, |v| v.is_string())
        });
        registry.register("entry.withdrawn", |p| p.is_object());
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_event_type_is_rejected() {
        let registry = EventTypeRegistry::platform_defaults();
        let event = DomainEvent::new("competition.deleted", "c-1", serde_json::json!({}));
        let err = registry.validate(&event).unwrap_err();
        assert!(matches!(err, CoreError::OutboxAppend(_)));
    }

    #[test]
    fn payload_shape_is_checked() {
        let registry = EventTypeRegistry::platform_defaults();

        let good = DomainEvent::new(
            "entry.submitted",
            "e-1",
            serde_json::json!({"competition_id": "c-1", "competitor": "A. Runner"}),
        );
        assert!(registry.validate(&good).is_ok());

        let bad = DomainEvent::new(
            "entry.submitted",
            "e-1",
            serde_json::json!({"competitor": "A. Runner"}),
        );
        assert!(registry.validate(&bad).is_err());
    }

    #[test]
    fn registry_is_extensible_at_startup() {
        let mut registry = EventTypeRegistry::platform_defaults();
        registry.register("competition.rescheduled", |p| p.is_object());
        assert!(registry.contains("competition.rescheduled"));
    }
}
