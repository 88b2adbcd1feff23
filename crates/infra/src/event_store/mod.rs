//! Append-only, tenant-scoped event store.
//!
//! Movements, closures and products are event-sourced; their streams live
//! here. The store knows nothing about those types: payloads are JSON.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
