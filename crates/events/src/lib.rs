//! Domain event abstractions.
//!
//! Events are facts returned by aggregate operations. This crate only defines
//! the mechanics (the `Event` trait and the envelope a committed event travels
//! in); the subscription crate defines the concrete events.

pub mod envelope;
pub mod event;

pub use envelope::{EnvelopeError, EventEnvelope};
pub use event::Event;
