use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - handed to the caller as return values, never published implicitly
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "subscription.cancelled").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time, taken from the injected clock).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Identifier of the aggregate the event belongs to.
    fn aggregate_id(&self) -> &str;
}
