//! Entry aggregate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pd_common::{CoreError, Result, TenantId};

use crate::events::DomainEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Submitted,
    Withdrawn,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Submitted => "SUBMITTED",
            EntryStatus::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "SUBMITTED" => Ok(EntryStatus::Submitted),
            "WITHDRAWN" => Ok(EntryStatus::Withdrawn),
            other => Err(CoreError::validation(format!(
                "unknown entry status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Entry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub competition_id: Uuid,
    pub competitor: String,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

impl Entry {
    pub fn submit(
        tenant_id: TenantId,
        competition_id: Uuid,
        competitor: impl Into<String>,
    ) -> Result<Self> {
        let competitor = competitor.into();
        if competitor.trim().is_empty() {
            return Err(CoreError::validation("competitor name must not be empty"));
        }

        let now = Utc::now();
        let mut entry = Self {
            id: Uuid::new_v4(),
            tenant_id,
            competition_id,
            competitor,
            status: EntryStatus::Submitted,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        entry.record(
            "entry.submitted",
            serde_json::json!({
                "competition_id": entry.competition_id.to_string(),
                "competitor": entry.competitor,
            }),
        );
        Ok(entry)
    }

    /// Rehydrate from storage without recording events.
    pub fn from_row(
        id: Uuid,
        tenant_id: TenantId,
        competition_id: Uuid,
        competitor: String,
        status: EntryStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            competition_id,
            competitor,
            status,
            created_at,
            updated_at,
            events: Vec::new(),
        }
    }

    pub fn withdraw(&mut self) -> Result<()> {
        if self.status != EntryStatus::Submitted {
            return Err(CoreError::validation("entry is already withdrawn"));
        }
        self.status = EntryStatus::Withdrawn;
        self.updated_at = Utc::now();
        self.record("entry.withdrawn", serde_json::json!({}));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn record(&mut self, event_type: &str, payload: serde_json::Value) {
        self.events
            .push(DomainEvent::new(event_type, self.id.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_records_event_with_payload() {
        let competition_id = Uuid::new_v4();
        let mut entry = Entry::submit(TenantId::new(), competition_id, "A. Runner").unwrap();
        let events = entry.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "entry.submitted");
        assert_eq!(
            events[0].payload["competition_id"],
            competition_id.to_string()
        );
    }

    #[test]
    fn double_withdraw_is_rejected() {
        let mut entry = Entry::submit(TenantId::new(), Uuid::new_v4(), "A. Runner").unwrap();
        entry.take_events();

        entry.withdraw().unwrap();
        assert_eq!(entry.take_events().len(), 1);

        assert!(entry.withdraw().is_err());
        assert!(entry.take_events().is_empty());
    }
}
