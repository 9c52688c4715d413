//! Outbox relay.
//!
//! Background workers poll the outbox store for pending records, claim a
//! bounded batch under a time-limited lease, publish each record's envelope
//! to the broker, and mark outcomes. Correctness under concurrent workers
//! comes entirely from the store's atomic conditional claim; there is no
//! in-process coordination. Delivery is at-least-once: a worker that dies
//! after claiming loses its lease and another worker republishes, and
//! consumers dedupe on `event_id`.

pub mod consumer;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod repository;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use pd_common::{OutboxRecord, TenantId};

pub use consumer::{DedupingConsumer, EnvelopeHandler, IdempotencyStore, InMemoryIdempotencyStore};
pub use publisher::EventPublisher;
pub use repository::OutboxRepository;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identifies this worker in `locked_by`; unique per instance.
    pub worker_id: String,
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// How long a claim holds before another worker may reclaim the record.
    pub lease_duration: Duration,
    /// Attempts before a record is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay; doubles each attempt.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Broker I/O bound per record; a hung publish counts as a failure.
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("relay-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            lease_duration: Duration::from_secs(30),
            max_attempts: 8,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Exponential backoff with up to 10% jitter, capped.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(2u64.saturating_pow(attempts.saturating_sub(1).min(20)));
        let capped = exp.min(self.backoff_cap.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=capped / 10 + 1);
        Duration::from_millis(capped + jitter)
    }
}

pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
        }
    }

    /// Poll loop. Cancel from outside (select against a shutdown signal);
    /// records claimed by a cancelled batch are recovered by lease expiry.
    pub async fn start(&self) {
        info!(worker_id = %self.config.worker_id, "starting outbox relay");
        loop {
            match self.process_batch().await {
                Ok(0) => sleep(self.config.poll_interval).await,
                Ok(published) => {
                    debug!(count = published, "relay batch complete");
                }
                Err(e) => {
                    // store trouble; back off to the poll interval rather than spin
                    error!("outbox relay batch failed: {}", e);
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Claim and publish one batch. Per-record publish failures are absorbed
    /// into the retry path and never abort the rest of the batch, so broker
    /// trouble for one destination cannot starve other tenants' events. The
    /// exception is records behind a failure within the same aggregate: those
    /// are handed back unpublished to preserve the aggregate's append order.
    pub async fn process_batch(&self) -> Result<usize> {
        let records = self
            .repository
            .claim_batch(
                &self.config.worker_id,
                self.config.batch_size,
                self.config.lease_duration,
            )
            .await?;
        if records.is_empty() {
            return Ok(0);
        }
        counter!("podium_outbox_claimed_total").increment(records.len() as u64);

        let mut published = 0usize;
        let mut failed_aggregates: HashSet<(TenantId, String)> = HashSet::new();
        for record in records {
            let aggregate = (record.tenant_id, record.aggregate_id.clone());
            if failed_aggregates.contains(&aggregate) {
                // an earlier event of this aggregate just failed; publishing
                // this one would break append order, so hand it back
                if let Err(e) = self.repository.release(record.event_id).await {
                    warn!(event_id = %record.event_id, "release failed: {}", e);
                }
                continue;
            }
            if self.publish_one(&record).await {
                published += 1;
            } else {
                failed_aggregates.insert(aggregate);
            }
        }
        Ok(published)
    }

    async fn publish_one(&self, record: &OutboxRecord) -> bool {
        let envelope = record.envelope();
        let outcome = match timeout(
            self.config.publish_timeout,
            self.publisher.publish(envelope.routing_key(), &envelope),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "publish timed out after {:?}",
                self.config.publish_timeout
            )),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.repository.mark_published(record.event_id).await {
                    // publish succeeded but the mark failed; the record will be
                    // reclaimed after lease expiry and redelivered, which the
                    // at-least-once contract allows
                    warn!(event_id = %record.event_id, "mark_published failed: {}", e);
                    return false;
                }
                counter!("podium_outbox_published_total").increment(1);
                debug!(event_id = %record.event_id, event_type = %record.event_type, "published");
                true
            }
            Err(error) => {
                let attempts = record.attempt_count + 1;
                if attempts >= self.config.max_attempts {
                    if let Err(e) = self.repository.dead_letter(record.event_id, &error).await {
                        error!(event_id = %record.event_id, "dead_letter failed: {}", e);
                        return false;
                    }
                    counter!("podium_outbox_dead_lettered_total").increment(1);
                    error!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        attempts,
                        "event dead-lettered: {}", error
                    );
                } else {
                    let retry_at = Utc::now()
                        + ChronoDuration::from_std(self.config.backoff_delay(attempts))
                            .unwrap_or_else(|_| ChronoDuration::seconds(60));
                    if let Err(e) = self
                        .repository
                        .retry_later(record.event_id, &error, retry_at)
                        .await
                    {
                        error!(event_id = %record.event_id, "retry_later failed: {}", e);
                        return false;
                    }
                    counter!("podium_outbox_publish_failures_total").increment(1);
                    warn!(
                        event_id = %record.event_id,
                        attempt = attempts,
                        retry_at = %retry_at,
                        "publish failed, scheduled for retry: {}", error
                    );
                }
                false
            }
        }
    }
}
