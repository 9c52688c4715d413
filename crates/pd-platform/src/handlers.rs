//! Command handlers for the aggregate write path.
//!
//! Each handler runs one atomic transaction: load and validate the aggregate
//! under the caller's isolation context, apply the mutation, flush the
//! recorded events to the outbox, commit. Any failure rolls the whole
//! operation back; no partial mutation, no orphaned outbox entry.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use pd_common::{CoreError, Result};
use pd_store::TenantPool;
use pd_tenant::AccessContext;

use crate::domain::{Competition, Entry};
use crate::events::EventTypeRegistry;
use crate::repository::{append_events, CompetitionRepository, EntryRepository};

pub struct CommandHandlers {
    pool: TenantPool,
    registry: Arc<EventTypeRegistry>,
}

impl CommandHandlers {
    pub fn new(pool: TenantPool, registry: Arc<EventTypeRegistry>) -> Self {
        Self { pool, registry }
    }

    pub async fn create_competition(&self, ctx: &AccessContext, name: &str) -> Result<Uuid> {
        let mut tx = self.pool.begin(ctx).await?;

        let mut competition = Competition::create(tx.tenant_id()?, name)?;
        CompetitionRepository::insert(&mut tx, &competition).await?;
        append_events(&mut tx, &self.registry, &competition.take_events()).await?;

        tx.commit().await?;
        info!(competition_id = %competition.id, "competition created");
        Ok(competition.id)
    }

    pub async fn open_registration(&self, ctx: &AccessContext, competition_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin(ctx).await?;

        let mut competition = CompetitionRepository::find_by_id(&mut tx, competition_id)
            .await?
            .ok_or_else(|| CoreError::not_found("competition", competition_id))?;
        competition.open_registration()?;
        CompetitionRepository::update(&mut tx, &competition).await?;
        append_events(&mut tx, &self.registry, &competition.take_events()).await?;

        tx.commit().await?;
        info!(competition_id = %competition_id, "registration opened");
        Ok(())
    }

    pub async fn close_registration(
        &self,
        ctx: &AccessContext,
        competition_id: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin(ctx).await?;

        let mut competition = CompetitionRepository::find_by_id(&mut tx, competition_id)
            .await?
            .ok_or_else(|| CoreError::not_found("competition", competition_id))?;
        competition.close_registration()?;
        CompetitionRepository::update(&mut tx, &competition).await?;
        append_events(&mut tx, &self.registry, &competition.take_events()).await?;

        tx.commit().await?;
        info!(competition_id = %competition_id, "registration closed");
        Ok(())
    }

    pub async fn submit_entry(
        &self,
        ctx: &AccessContext,
        competition_id: Uuid,
        competitor: &str,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin(ctx).await?;

        let competition = CompetitionRepository::find_by_id(&mut tx, competition_id)
            .await?
            .ok_or_else(|| CoreError::not_found("competition", competition_id))?;
        if !competition.accepts_entries() {
            return Err(CoreError::validation(
                "competition is not open for registration",
            ));
        }

        let mut entry = Entry::submit(tx.tenant_id()?, competition_id, competitor)?;
        EntryRepository::insert(&mut tx, &entry).await?;
        append_events(&mut tx, &self.registry, &entry.take_events()).await?;

        tx.commit().await?;
        info!(entry_id = %entry.id, competition_id = %competition_id, "entry submitted");
        Ok(entry.id)
    }

    pub async fn withdraw_entry(&self, ctx: &AccessContext, entry_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin(ctx).await?;

        let mut entry = EntryRepository::find_by_id(&mut tx, entry_id)
            .await?
            .ok_or_else(|| CoreError::not_found("entry", entry_id))?;
        entry.withdraw()?;
        EntryRepository::update(&mut tx, &entry).await?;
        append_events(&mut tx, &self.registry, &entry.take_events()).await?;

        tx.commit().await?;
        info!(entry_id = %entry_id, "entry withdrawn");
        Ok(())
    }
}
