//! Append-only event store boundary.
//!
//! Organization-scoped streams with per-stream optimistic concurrency and
//! atomic multi-stream batches. Two backends: in-memory for tests and dev,
//! Postgres for persistent deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
