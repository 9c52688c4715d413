//! Outbox append, write-path side.
//!
//! Runs inside the same [`ScopedTx`] as the business mutation so the write
//! and its event records commit atomically. The relay's read side lives in
//! pd-outbox.

use uuid::Uuid;

use pd_common::{CoreError, Result};
use pd_store::ScopedTx;

use crate::events::{DomainEvent, EventTypeRegistry};

/// Append one outbox record per domain event, generating the `event_id`
/// idempotency key at append time. Any failure here propagates as
/// `OutboxAppend` and rolls back the entire business operation.
pub async fn append_events(
    tx: &mut ScopedTx,
    registry: &EventTypeRegistry,
    events: &[DomainEvent],
) -> Result<Vec<Uuid>> {
    let tenant = tx.tenant_id()?;
    let mut event_ids = Vec::with_capacity(events.len());

    for event in events {
        registry.validate(event)?;

        let event_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO outbox_events \
             (event_id, tenant_id, aggregate_id, event_type, payload, occurred_at, publish_status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'PENDING')",
        )
        .bind(event_id)
        .bind(tenant.as_uuid())
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(tx.conn())
        .await
        .map_err(|e| CoreError::outbox_append(e.to_string()))?;

        event_ids.push(event_id);
    }

    Ok(event_ids)
}
