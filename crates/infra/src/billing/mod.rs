//! Billing client adapters.

mod http;
mod in_memory;

pub use http::HttpBillingClient;
pub use in_memory::InMemoryBillingClient;
