//! Event mechanics shared by every bodega module.
//!
//! Domain crates describe *what happened* with typed events; this crate holds
//! the domain-agnostic plumbing around them: envelopes and pub/sub.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
