//! Subscription repository adapters.

mod in_memory;
mod postgres;
mod record;

pub use in_memory::InMemorySubscriptionRepository;
pub use postgres::PostgresSubscriptionRepository;
pub use record::SubscriptionRecord;
