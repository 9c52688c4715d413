//! Postgres outbox repository.
//!
//! All operations run under the explicit elevated system context, because the
//! relay scans across tenants, which the default tenant-scoped path must
//! never do.
//! The claim is a single conditional UPDATE over a `FOR UPDATE SKIP LOCKED`
//! subselect, which is what makes concurrent relay workers safe without any
//! in-process coordination.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use pd_common::{OutboxRecord, OutboxStatus, Result, TenantId};
use pd_store::TenantPool;
use pd_tenant::AccessContext;

use crate::repository::OutboxRepository;

pub const RELAY_ACTOR: &str = "outbox-relay";

pub struct PostgresOutboxRepository {
    pool: TenantPool,
    context: AccessContext,
}

impl PostgresOutboxRepository {
    pub fn new(pool: TenantPool) -> Self {
        Self {
            pool,
            context: AccessContext::system(RELAY_ACTOR),
        }
    }

    fn record_from_row(row: &PgRow) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            event_id: row.get("event_id"),
            tenant_id: TenantId::from_uuid(row.get("tenant_id")),
            aggregate_id: row.get("aggregate_id"),
            event_type: row.get("event_type"),
            payload: row.get("payload"),
            occurred_at: row.get("occurred_at"),
            publish_status: OutboxStatus::parse(row.get("publish_status"))?,
            attempt_count: row.get::<i32, _>("attempt_count") as u32,
            last_attempt_at: row.get("last_attempt_at"),
            last_error: row.get("last_error"),
            locked_by: row.get("locked_by"),
            locked_until: row.get("locked_until"),
        })
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    /// Claims Pending records past their retry time and Claimed records whose
    /// lease has lapsed (a crashed worker's leftovers). A record whose
    /// aggregate still has an earlier unpublished event is skipped, so only
    /// the head of each aggregate's chain is ever in flight and a retrying
    /// failure holds its successors back.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>> {
        let locked_until = Utc::now()
            + ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::seconds(30));

        let mut tx = self.pool.begin(&self.context).await?;
        let rows = sqlx::query(
            r#"
            UPDATE outbox_events
            SET publish_status = 'CLAIMED',
                locked_by = $1,
                locked_until = $2,
                last_attempt_at = now()
            WHERE event_id IN (
                SELECT o.event_id FROM outbox_events o
                WHERE o.publish_status IN ('PENDING', 'CLAIMED')
                  AND (o.locked_until IS NULL OR o.locked_until < now())
                  AND NOT EXISTS (
                      SELECT 1 FROM outbox_events prior
                      WHERE prior.tenant_id = o.tenant_id
                        AND prior.aggregate_id = o.aggregate_id
                        AND prior.occurred_at < o.occurred_at
                        AND prior.publish_status NOT IN ('PUBLISHED', 'DEAD_LETTERED')
                  )
                ORDER BY o.tenant_id, o.occurred_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING event_id, tenant_id, aggregate_id, event_type, payload,
                      occurred_at, publish_status, attempt_count, last_attempt_at,
                      last_error, locked_by, locked_until
            "#,
        )
        .bind(worker_id)
        .bind(locked_until)
        .bind(limit as i64)
        .fetch_all(tx.conn())
        .await?;
        tx.commit().await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::record_from_row(row)?);
        }
        // the UPDATE does not preserve subselect order
        records.sort_by(|a, b| {
            (a.tenant_id.as_uuid(), a.occurred_at).cmp(&(b.tenant_id.as_uuid(), b.occurred_at))
        });
        Ok(records)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin(&self.context).await?;
        sqlx::query(
            "UPDATE outbox_events \
             SET publish_status = 'PUBLISHED', locked_by = NULL, locked_until = NULL \
             WHERE event_id = $1 AND publish_status = 'CLAIMED'",
        )
        .bind(event_id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, event_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin(&self.context).await?;
        sqlx::query(
            "UPDATE outbox_events \
             SET publish_status = 'PENDING', locked_by = NULL, locked_until = NULL \
             WHERE event_id = $1 AND publish_status = 'CLAIMED'",
        )
        .bind(event_id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn retry_later(&self, event_id: Uuid, error: &str, retry_at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin(&self.context).await?;
        sqlx::query(
            "UPDATE outbox_events \
             SET publish_status = 'PENDING', attempt_count = attempt_count + 1, \
                 last_error = $1, locked_by = NULL, locked_until = $2 \
             WHERE event_id = $3 AND publish_status = 'CLAIMED'",
        )
        .bind(error)
        .bind(retry_at)
        .bind(event_id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter(&self, event_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.begin(&self.context).await?;
        sqlx::query(
            "UPDATE outbox_events \
             SET publish_status = 'DEAD_LETTERED', attempt_count = attempt_count + 1, \
                 last_error = $1, locked_by = NULL, locked_until = NULL \
             WHERE event_id = $2 AND publish_status = 'CLAIMED'",
        )
        .bind(error)
        .bind(event_id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_dead_lettered(&self, limit: u32) -> Result<Vec<OutboxRecord>> {
        let mut tx = self.pool.begin(&self.context).await?;
        let rows = sqlx::query(
            "SELECT event_id, tenant_id, aggregate_id, event_type, payload, \
                    occurred_at, publish_status, attempt_count, last_attempt_at, \
                    last_error, locked_by, locked_until \
             FROM outbox_events WHERE publish_status = 'DEAD_LETTERED' \
             ORDER BY occurred_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(tx.conn())
        .await?;
        tx.commit().await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::record_from_row(row)?);
        }
        Ok(records)
    }
}
