//! Entry repository.

use sqlx::Row;
use uuid::Uuid;

use pd_common::{Result, TenantId};
use pd_store::ScopedTx;

use crate::domain::{Entry, EntryStatus};

pub struct EntryRepository;

impl EntryRepository {
    pub async fn insert(tx: &mut ScopedTx, entry: &Entry) -> Result<()> {
        tx.assert_owned(entry.tenant_id, "entry")?;
        sqlx::query(
            "INSERT INTO entries (id, tenant_id, competition_id, competitor, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.competition_id)
        .bind(&entry.competitor)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(tx.conn())
        .await?;
        Ok(())
    }

    pub async fn find_by_id(tx: &mut ScopedTx, id: Uuid) -> Result<Option<Entry>> {
        let tenant = tx.tenant_id()?;
        let row = sqlx::query(
            "SELECT id, tenant_id, competition_id, competitor, status, created_at, updated_at \
             FROM entries WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant.as_uuid())
        .fetch_optional(tx.conn())
        .await?;

        row.map(|row| {
            Ok(Entry::from_row(
                row.get("id"),
                TenantId::from_uuid(row.get("tenant_id")),
                row.get("competition_id"),
                row.get("competitor"),
                EntryStatus::parse(row.get("status"))?,
                row.get("created_at"),
                row.get("updated_at"),
            ))
        })
        .transpose()
    }

    pub async fn update(tx: &mut ScopedTx, entry: &Entry) -> Result<()> {
        tx.assert_owned(entry.tenant_id, "entry")?;
        sqlx::query(
            "UPDATE entries SET status = $1, updated_at = $2 WHERE id = $3 AND tenant_id = $4",
        )
        .bind(entry.status.as_str())
        .bind(entry.updated_at)
        .bind(entry.id)
        .bind(entry.tenant_id.as_uuid())
        .execute(tx.conn())
        .await?;
        Ok(())
    }
}
