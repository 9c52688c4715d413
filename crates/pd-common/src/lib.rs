use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Tenant Identity
// ============================================================================

/// Opaque 128-bit tenant identifier.
///
/// Attached to every tenant-owned row; never null on a tenant-owned entity
/// and immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::validation(format!("invalid tenant id: {}", s)))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Outbox Types
// ============================================================================

/// Publish lifecycle of an outbox record.
///
/// Pending -> Claimed -> Published is the success path. A failed publish
/// returns the record to Pending with `locked_until` set to the next retry
/// time; records that exhaust their retry budget become DeadLettered and are
/// excluded from automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Published,
    Failed,
    DeadLettered,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Claimed => "CLAIMED",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::DeadLettered => "DEAD_LETTERED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "CLAIMED" => Ok(OutboxStatus::Claimed),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DEAD_LETTERED" => Ok(OutboxStatus::DeadLettered),
            other => Err(CoreError::validation(format!(
                "unknown outbox status: {}",
                other
            ))),
        }
    }
}

/// A row in the outbox table, colocated with the business data so the write
/// and the event record commit atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Primary key and the idempotency key downstream consumers dedupe on.
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: String,
    /// Dot-delimited, e.g. `competition.created`.
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Set at append time; orders events within a tenant.
    pub occurred_at: DateTime<Utc>,
    pub publish_status: OutboxStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Convert to the wire envelope published to the broker.
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id.clone(),
            data: self.payload.clone(),
        }
    }
}

// ============================================================================
// Wire Event Envelope
// ============================================================================

/// The structured record consumed by the message broker and downstream
/// services. Consumers are contractually required to key their idempotency
/// store on `event_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub aggregate_id: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Broker topic / routing key derived from the event type.
    pub fn routing_key(&self) -> &str {
        &self.event_type
    }

    /// FIFO group for brokers that order within a group: events for the same
    /// aggregate within a tenant publish in append order.
    pub fn message_group(&self) -> String {
        format!("{}:{}", self.tenant_id, self.aggregate_id)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no tenant context could be resolved for this request")]
    NoTenantContext,

    #[error("cross-tenant access denied: tenant {tenant} attempted to touch {resource}")]
    CrossTenantAccessDenied { tenant: TenantId, resource: String },

    #[error("outbox append failed: {0}")]
    OutboxAppend(String),

    #[error("transient publish failure: {0}")]
    PublishTransient(String),

    #[error("permanent publish failure for event {event_id} after {attempts} attempts")]
    PublishPermanent { event_id: Uuid, attempts: u32 },

    #[error("not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn cross_tenant(tenant: TenantId, resource: impl Into<String>) -> Self {
        Self::CrossTenantAccessDenied {
            tenant,
            resource: resource.into(),
        }
    }

    pub fn outbox_append(message: impl Into<String>) -> Self {
        Self::OutboxAppend(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_round_trips_through_display() {
        let id = TenantId::new();
        let parsed = TenantId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn outbox_status_round_trips() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Claimed,
            OutboxStatus::Published,
            OutboxStatus::Failed,
            OutboxStatus::DeadLettered,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OutboxStatus::parse("bogus").is_err());
    }

    #[test]
    fn envelope_carries_idempotency_key_and_group() {
        let tenant = TenantId::new();
        let record = OutboxRecord {
            event_id: Uuid::new_v4(),
            tenant_id: tenant,
            aggregate_id: "comp-1".to_string(),
            event_type: "competition.created".to_string(),
            payload: serde_json::json!({"name": "Spring Open"}),
            occurred_at: Utc::now(),
            publish_status: OutboxStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            locked_by: None,
            locked_until: None,
        };

        let envelope = record.envelope();
        assert_eq!(envelope.event_id, record.event_id);
        assert_eq!(envelope.routing_key(), "competition.created");
        assert_eq!(envelope.message_group(), format!("{}:comp-1", tenant));
    }
}
