use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are immutable facts (a movement was approved, a closure was
/// reopened), versioned for schema evolution and append-only.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "movements.movement.completed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
