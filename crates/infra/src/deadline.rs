//! Caller-supplied deadlines for port calls.
//!
//! Every repository and billing call made by a workflow is wrapped in the
//! request's `Deadline`; expiry becomes the port's own `Timeout` error so the
//! transient/permanent classification travels with it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// The deadline elapsed before the wrapped operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded during {operation}")]
pub struct DeadlineExceeded {
    pub operation: &'static str,
}

/// Absolute point in time by which an operation must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        if other.0 < self.0 { other } else { self }
    }

    /// Run `fut`, failing with `E::from(DeadlineExceeded)` once the deadline passes.
    pub async fn run<F, T, E>(&self, operation: &'static str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<DeadlineExceeded>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, "deadline exceeded");
                Err(DeadlineExceeded { operation }.into())
            }
        }
    }
}
