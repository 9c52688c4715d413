//! Podium platform core.
//!
//! Domain aggregates, domain events, and the command handlers that make up
//! the aggregate write path: every business mutation and the outbox records
//! for its events commit in one local transaction.

pub mod domain;
pub mod events;
pub mod handlers;
pub mod repository;

pub use events::{DomainEvent, EventTypeRegistry};
pub use handlers::CommandHandlers;
