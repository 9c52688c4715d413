//! The relay's view of the outbox store.
//!
//! The only mutation discipline permitted is claim-then-update: no worker may
//! touch a record's status without first successfully claiming it, and a
//! claim is a time-bounded lease that expires if the worker dies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use pd_common::{OutboxRecord, Result};

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Atomically claim up to `limit` eligible records for `worker_id` with a
    /// lease of `lease`. Eligible means Pending with no live lease, and with
    /// no earlier unpublished record for the same aggregate: an aggregate's
    /// events leave the outbox head first, so a failure sitting out its
    /// backoff holds back everything appended after it. Records come back
    /// ordered by `occurred_at` within each tenant; cross-tenant order is
    /// unspecified. Two workers racing never claim the same record.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>>;

    /// Success path: Claimed -> Published, exactly once.
    async fn mark_published(&self, event_id: Uuid) -> Result<()>;

    /// Hand a claimed record back untouched: Claimed -> Pending with the lock
    /// cleared and no attempt charged. Used when the relay abandons the rest
    /// of an aggregate's records after an earlier one fails mid-batch.
    async fn release(&self, event_id: Uuid) -> Result<()>;

    /// Retry path: record the failure, bump the attempt count, and return the
    /// record to Pending with `locked_until` set to the next retry time so the
    /// claim predicate alone implements the backoff.
    async fn retry_later(
        &self,
        event_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Retry budget exhausted: park the record for operator inspection,
    /// excluded from automatic retry.
    async fn dead_letter(&self, event_id: Uuid, error: &str) -> Result<()>;

    /// Dead-lettered records, oldest first, for the operator surface.
    async fn list_dead_lettered(&self, limit: u32) -> Result<Vec<OutboxRecord>>;
}
