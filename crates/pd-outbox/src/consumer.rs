//! Consumer-side idempotency contract.
//!
//! Delivery from the relay is at-least-once; effective exactly-once is the
//! consumer's job. The contract is fixed: dedupe on `event_id` alone. This
//! module carries the reference implementation downstream services are
//! expected to mirror.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use pd_common::EventEnvelope;

/// Records which event ids have already been processed.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns true if the id was newly recorded, false if already present.
    async fn insert_if_absent(&self, event_id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    seen: Mutex<HashSet<Uuid>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn insert_if_absent(&self, event_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.seen.lock().insert(event_id))
    }
}

#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Wraps a handler with the dedupe check: a redelivered `event_id` is a no-op.
pub struct DedupingConsumer<S, H> {
    store: S,
    handler: H,
}

impl<S: IdempotencyStore, H: EnvelopeHandler> DedupingConsumer<S, H> {
    pub fn new(store: S, handler: H) -> Self {
        Self { store, handler }
    }

    /// Returns true if the handler ran, false if the envelope was a duplicate.
    pub async fn consume(&self, envelope: &EventEnvelope) -> anyhow::Result<bool> {
        if !self.store.insert_if_absent(envelope.event_id).await? {
            debug!(event_id = %envelope.event_id, "duplicate delivery ignored");
            return Ok(false);
        }
        self.handler.handle(envelope).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pd_common::TenantId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl EnvelopeHandler for &CountingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: "entry.submitted".to_string(),
            occurred_at: Utc::now(),
            tenant_id: TenantId::new(),
            aggregate_id: "e-1".to_string(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let handler = CountingHandler {
            handled: AtomicUsize::new(0),
        };
        let consumer = DedupingConsumer::new(InMemoryIdempotencyStore::new(), &handler);

        let envelope = envelope();
        assert!(consumer.consume(&envelope).await.unwrap());
        assert!(!consumer.consume(&envelope).await.unwrap());
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_events_both_handled() {
        let handler = CountingHandler {
            handled: AtomicUsize::new(0),
        };
        let consumer = DedupingConsumer::new(InMemoryIdempotencyStore::new(), &handler);

        assert!(consumer.consume(&envelope()).await.unwrap());
        assert!(consumer.consume(&envelope()).await.unwrap());
        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
    }
}
