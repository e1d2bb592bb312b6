//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// lookups, terminal-state conflicts). Infrastructure concerns belong elsewhere.
///
/// These errors are never retried: a validation failure stays a validation
/// failure no matter how often the request is repeated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The customer identifier is empty or the customer is not eligible.
    #[error("invalid customer: {0}")]
    InvalidCustomer(String),

    /// The plan identifier is empty.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The price is not a positive amount of cents.
    #[error("invalid price: {0} cents (must be positive)")]
    InvalidPrice(i64),

    /// The referenced subscription does not exist.
    #[error("subscription not found: {0}")]
    NotFound(String),

    /// The subscription already reached its terminal state.
    #[error("subscription already cancelled: {0}")]
    AlreadyCancelled(String),
}

impl DomainError {
    pub fn invalid_customer(msg: impl Into<String>) -> Self {
        Self::InvalidCustomer(msg.into())
    }

    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn already_cancelled(id: impl Into<String>) -> Self {
        Self::AlreadyCancelled(id.into())
    }

    /// Caller input was malformed (`InvalidCustomer`, `InvalidPlan`, `InvalidPrice`).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCustomer(_) | Self::InvalidPlan(_) | Self::InvalidPrice(_)
        )
    }

    /// The intended effect was already achieved by someone else.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyCancelled(_))
    }
}
