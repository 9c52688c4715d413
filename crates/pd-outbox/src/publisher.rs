//! Broker publish seam.

use async_trait::async_trait;

use pd_common::{EventEnvelope, Result};

/// The relay's only contract with the broker: publish an envelope under a
/// routing key derived from the event type, get an ack or an error back.
/// Errors are treated as transient; the relay owns retry and dead-lettering.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, envelope: &EventEnvelope) -> Result<()>;
}
