//! In-memory outbox repository.
//!
//! Implements the same claim-lease semantics as the Postgres backend, with
//! the mutex standing in for the database's conditional update. Used by the
//! relay tests and handy for local development without a database.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use pd_common::{CoreError, OutboxRecord, OutboxStatus, Result};

use crate::repository::OutboxRepository;

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    records: Mutex<HashMap<Uuid, OutboxRecord>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/write-path hook: append a pending record.
    pub fn insert(&self, record: OutboxRecord) {
        self.records.lock().insert(record.event_id, record);
    }

    pub fn get(&self, event_id: Uuid) -> Option<OutboxRecord> {
        self.records.lock().get(&event_id).cloned()
    }

    pub fn count_with_status(&self, status: OutboxStatus) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.publish_status == status)
            .count()
    }

    fn update_claimed<F>(&self, event_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxRecord),
    {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&event_id)
            .ok_or_else(|| CoreError::not_found("outbox record", event_id))?;
        // claim-then-update discipline: reject status changes on unclaimed rows
        if record.publish_status != OutboxStatus::Claimed {
            return Err(CoreError::validation(format!(
                "record {} is not claimed",
                event_id
            )));
        }
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>> {
        let now = Utc::now();
        let locked_until =
            now + ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::seconds(30));

        let mut records = self.records.lock();
        let mut eligible: Vec<Uuid> = records
            .values()
            .filter(|r| {
                // Pending past its retry time, or a Claimed record whose
                // lease has lapsed (crashed worker)
                matches!(
                    r.publish_status,
                    OutboxStatus::Pending | OutboxStatus::Claimed
                ) && r.locked_until.map_or(true, |until| until < now)
            })
            .filter(|r| {
                // only the head of each aggregate's chain is claimable
                !records.values().any(|prior| {
                    prior.tenant_id == r.tenant_id
                        && prior.aggregate_id == r.aggregate_id
                        && prior.occurred_at < r.occurred_at
                        && !matches!(
                            prior.publish_status,
                            OutboxStatus::Published | OutboxStatus::DeadLettered
                        )
                })
            })
            .map(|r| r.event_id)
            .collect();
        eligible.sort_by_key(|id| {
            let r = &records[id];
            (r.tenant_id.as_uuid(), r.occurred_at, r.event_id)
        });
        eligible.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(record) = records.get_mut(&id) {
                record.publish_status = OutboxStatus::Claimed;
                record.locked_by = Some(worker_id.to_string());
                record.locked_until = Some(locked_until);
                record.last_attempt_at = Some(now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<()> {
        self.update_claimed(event_id, |record| {
            record.publish_status = OutboxStatus::Published;
            record.locked_by = None;
            record.locked_until = None;
        })
    }

    async fn release(&self, event_id: Uuid) -> Result<()> {
        self.update_claimed(event_id, |record| {
            record.publish_status = OutboxStatus::Pending;
            record.locked_by = None;
            record.locked_until = None;
        })
    }

    async fn retry_later(&self, event_id: Uuid, error: &str, retry_at: DateTime<Utc>) -> Result<()> {
        self.update_claimed(event_id, |record| {
            record.publish_status = OutboxStatus::Pending;
            record.attempt_count += 1;
            record.last_error = Some(error.to_string());
            record.locked_by = None;
            record.locked_until = Some(retry_at);
        })
    }

    async fn dead_letter(&self, event_id: Uuid, error: &str) -> Result<()> {
        self.update_claimed(event_id, |record| {
            record.publish_status = OutboxStatus::DeadLettered;
            record.attempt_count += 1;
            record.last_error = Some(error.to_string());
            record.locked_by = None;
            record.locked_until = None;
        })
    }

    async fn list_dead_lettered(&self, limit: u32) -> Result<Vec<OutboxRecord>> {
        let records = self.records.lock();
        let mut dead: Vec<OutboxRecord> = records
            .values()
            .filter(|r| r.publish_status == OutboxStatus::DeadLettered)
            .cloned()
            .collect();
        dead.sort_by_key(|r| r.occurred_at);
        dead.truncate(limit as usize);
        Ok(dead)
    }
}
