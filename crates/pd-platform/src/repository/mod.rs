//! Repository layer.
//!
//! Every statement binds the tenant id taken from the [`ScopedTx`] it runs
//! in, which is the application-layer half of the isolation guard. The row
//! policies installed by pd-store enforce the same predicate independently.

pub mod competition;
pub mod entry;
pub mod outbox;

pub use competition::CompetitionRepository;
pub use entry::EntryRepository;
pub use outbox::append_events;
