use chrono::{DateTime, Utc};

/// A persisted business fact.
///
/// Events are append-only and never edited; schema changes bump `version`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. `"inventory.stock_item.movement_recorded"`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
