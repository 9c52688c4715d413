//! Competition aggregate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pd_common::{CoreError, Result, TenantId};

use crate::events::DomainEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionStatus {
    Draft,
    Open,
    Closed,
}

impl CompetitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionStatus::Draft => "DRAFT",
            CompetitionStatus::Open => "OPEN",
            CompetitionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "DRAFT" => Ok(CompetitionStatus::Draft),
            "OPEN" => Ok(CompetitionStatus::Open),
            "CLOSED" => Ok(CompetitionStatus::Closed),
            other => Err(CoreError::validation(format!(
                "unknown competition status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Competition {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub status: CompetitionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

impl Competition {
    pub fn create(tenant_id: TenantId, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::validation("competition name must not be empty"));
        }

        let now = Utc::now();
        let mut competition = Self {
            id: Uuid::new_v4(),
            tenant_id,
            name,
            status: CompetitionStatus::Draft,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        competition.record(
            "competition.created",
            serde_json::json!({ "name": competition.name }),
        );
        Ok(competition)
    }

    /// Rehydrate from storage without recording events.
    pub fn from_row(
        id: Uuid,
        tenant_id: TenantId,
        name: String,
        status: CompetitionStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name,
            status,
            created_at,
            updated_at,
            events: Vec::new(),
        }
    }

    pub fn open_registration(&mut self) -> Result<()> {
        if self.status != CompetitionStatus::Draft {
            return Err(CoreError::validation(format!(
                "cannot open registration from status {}",
                self.status.as_str()
            )));
        }
        self.status = CompetitionStatus::Open;
        self.updated_at = Utc::now();
        self.record("competition.registration_opened", serde_json::json!({}));
        Ok(())
    }

    pub fn close_registration(&mut self) -> Result<()> {
        if self.status != CompetitionStatus::Open {
            return Err(CoreError::validation(format!(
                "cannot close registration from status {}",
                self.status.as_str()
            )));
        }
        self.status = CompetitionStatus::Closed;
        self.updated_at = Utc::now();
        self.record("competition.registration_closed", serde_json::json!({}));
        Ok(())
    }

    pub fn accepts_entries(&self) -> bool {
        self.status == CompetitionStatus::Open
    }

    /// Drain events recorded since load. Called by the command handler when
    /// flushing to the outbox; the aggregate itself never touches storage.
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
    fn create_records_created_event() {
        let mut competition = Competition::create(TenantId::new(), "Spring Open").unwrap();
        let events = competition.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "competition.created");
        assert_eq!(events[0].aggregate_id, competition.id.to_string());
        // drained, not re-emitted
        assert!(competition.take_events().is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Competition::create(TenantId::new(), "  ").is_err());
    }

    #[test]
    fn lifecycle_transitions_are_ordered() {
        let mut competition = Competition::create(TenantId::new(), "Spring Open").unwrap();
        competition.take_events();

        // cannot close before opening
        assert!(competition.close_registration().is_err());

        competition.open_registration().unwrap();
        assert!(competition.accepts_entries());
        // cannot open twice
        assert!(competition.open_registration().is_err());

        competition.close_registration().unwrap();
        assert!(!competition.accepts_entries());

        let events = competition.take_events();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "competition.registration_opened",
                "competition.registration_closed"
            ]
        );
    }

    #[test]
    fn failed_transition_records_no_event() {
        let mut competition = Competition::create(TenantId::new(), "Spring Open").unwrap();
        competition.take_events();
        assert!(competition.close_registration().is_err());
        assert!(competition.take_events().is_empty());
    }
}
