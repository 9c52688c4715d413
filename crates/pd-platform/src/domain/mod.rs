//! Domain aggregates.
//!
//! Aggregates own a tenant id, enforce their own invariants, and record
//! domain events in memory as they mutate. Lifecycle is soft: status fields,
//! never physical deletion.

pub mod competition;
pub mod entry;

pub use competition::{Competition, CompetitionStatus};
pub use entry::{Entry, EntryStatus};
