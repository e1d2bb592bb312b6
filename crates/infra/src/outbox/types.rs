//! Outbox message, delivery status and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use submgr_events::EventEnvelope;

/// Unique outbox message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxMessageId(pub Uuid);

impl OutboxMessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its first delivery attempt
    Pending,
    /// Last attempt failed transiently; another is scheduled
    Retrying { error: String, attempt: u32 },
    /// Refund settled
    Delivered,
    /// Given up; needs manual reconciliation
    DeadLettered { error: String, attempts: u32 },
}

impl OutboxStatus {
    /// Stored label, also used as the indexed status column.
    pub fn label(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Retrying { .. } => "retrying",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::DeadLettered { .. } => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Delivered | OutboxStatus::DeadLettered { .. })
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, OutboxStatus::DeadLettered { .. })
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts before dead-lettering
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next attempt after attempt number `attempt` (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Record of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A committed domain event awaiting delivery to billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxMessageId,
    pub envelope: EventEnvelope<JsonValue>,
    pub status: OutboxStatus,
    /// Attempts made so far (starts at 0)
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant; while claimed, the end of the lease
    pub next_attempt_at: DateTime<Utc>,
    /// Set by `claim_ready`; only the holder may renew or record an attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<Uuid>,
    pub history: Vec<DeliveryAttempt>,
}

impl OutboxMessage {
    pub fn new(envelope: EventEnvelope<JsonValue>, now: DateTime<Utc>) -> Self {
        Self {
            id: OutboxMessageId::new(),
            envelope,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
            claim_token: None,
            history: Vec::new(),
        }
    }

    pub fn subscription_id(&self) -> &str {
        self.envelope.aggregate_id()
    }

    /// Claimable: not terminal and due.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now >= self.next_attempt_at
    }

    /// Whether `now` still falls inside the lease taken by `claim_ready`.
    pub fn holds_lease(&self, token: Uuid, now: DateTime<Utc>) -> bool {
        self.claim_token == Some(token) && !self.status.is_terminal() && now < self.next_attempt_at
    }

    /// Start a delivery attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.updated_at = now;
    }

    pub fn mark_delivered(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = OutboxStatus::Delivered;
        self.updated_at = now;
        self.push_history(started_at, now, None);
    }

    /// Record a failed attempt.
    ///
    /// Transient failures are rescheduled with backoff until the policy is
    /// exhausted; permanent failures dead-letter immediately.
    pub fn mark_failed(
        &mut self,
        error: String,
        transient: bool,
        policy: &RetryPolicy,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.updated_at = now;
        self.push_history(started_at, now, Some(error.clone()));

        if transient && policy.should_retry(self.attempts) {
            let delay = policy.delay_for_attempt(self.attempts);
            self.next_attempt_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.status = OutboxStatus::Retrying {
                error,
                attempt: self.attempts,
            };
        } else {
            self.status = OutboxStatus::DeadLettered {
                error,
                attempts: self.attempts,
            };
        }
    }

    /// Return a dead letter to the queue with a fresh attempt budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), OutboxError> {
        if !self.status.is_dead_lettered() {
            return Err(OutboxError::NotDeadLettered(self.id));
        }
        self.status = OutboxStatus::Pending;
        self.attempts = 0;
        self.next_attempt_at = now;
        self.claim_token = None;
        self.updated_at = now;
        Ok(())
    }

    fn push_history(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>, error: Option<String>) {
        self.history.push(DeliveryAttempt {
            attempt: self.attempts,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Outbox store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboxError {
    #[error("outbox message not found: {0}")]
    NotFound(OutboxMessageId),
    #[error("outbox message already exists: {0}")]
    AlreadyExists(OutboxMessageId),
    #[error("outbox message {0} is not dead-lettered")]
    NotDeadLettered(OutboxMessageId),
    #[error("claim on outbox message {0} was lost to another processor")]
    LeaseLost(OutboxMessageId),
    #[error("outbox storage error: {message}")]
    Storage { message: String, transient: bool },
    #[error("outbox message could not be (de)serialized: {0}")]
    Serialization(String),
}

impl OutboxError {
    pub fn storage(message: impl Into<String>, transient: bool) -> Self {
        Self::Storage {
            message: message.into(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, OutboxError::Storage { transient: true, .. })
    }
}
