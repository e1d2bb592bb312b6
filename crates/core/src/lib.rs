//! `submgr-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the domain error taxonomy, identifiers, and the injectable clock.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, PlanId, SubscriptionId};
