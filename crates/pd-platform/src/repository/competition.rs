//! Competition repository.

use sqlx::Row;
use uuid::Uuid;

use pd_common::{Result, TenantId};
use pd_store::ScopedTx;

use crate::domain::{Competition, CompetitionStatus};

pub struct CompetitionRepository;

impl CompetitionRepository {
    pub async fn insert(tx: &mut ScopedTx, competition: &Competition) -> Result<()> {
        tx.assert_owned(competition.tenant_id, "competition")?;
        sqlx::query(
            "INSERT INTO competitions (id, tenant_id, name, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(competition.id)
        .bind(competition.tenant_id.as_uuid())
        .bind(&competition.name)
        .bind(competition.status.as_str())
        .bind(competition.created_at)
        .bind(competition.updated_at)
        .execute(tx.conn())
        .await?;
        Ok(())
    }

    pub async fn find_by_id(tx: &mut ScopedTx, id: Uuid) -> Result<Option<Competition>> {
        let tenant = tx.tenant_id()?;
        let row = sqlx::query(
            "SELECT id, tenant_id, name, status, created_at, updated_at \
             FROM competitions WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant.as_uuid())
        .fetch_optional(tx.conn())
        .await?;

        row.map(|row| {
            Ok(Competition::from_row(
                row.get("id"),
                TenantId::from_uuid(row.get("tenant_id")),
                row.get("name"),
                CompetitionStatus::parse(row.get("status"))?,
                row.get("created_at"),
                row.get("updated_at"),
            ))
        })
        .transpose()
    }

    pub async fn update(tx: &mut ScopedTx, competition: &Competition) -> Result<()> {
        tx.assert_owned(competition.tenant_id, "competition")?;
        sqlx::query(
            "UPDATE competitions SET name = $1, status = $2, updated_at = $3 \
             WHERE id = $4 AND tenant_id = $5",
        )
        .bind(&competition.name)
        .bind(competition.status.as_str())
        .bind(competition.updated_at)
        .bind(competition.id)
        .bind(competition.tenant_id.as_uuid())
        .execute(tx.conn())
        .await?;
        Ok(())
    }
}
