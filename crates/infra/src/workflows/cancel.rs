use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Span, error, info, instrument, warn};

use submgr_core::{Clock, DomainError, SubscriptionId};
use submgr_events::EventEnvelope;
use submgr_subscription::{AGGREGATE_TYPE, SubscriptionCancelled};

use crate::deadline::Deadline;
use crate::outbox::{OutboxMessage, OutboxMessageId};
use crate::ports::{BillingClient, PendingWrite, RepositoryError, SubscriptionRepository};

use super::error::{RefundFailure, WorkflowError};

/// How a committed cancellation settles its refund.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMode {
    /// Call billing right after commit; a failure is reported, not retried.
    ///
    /// Nothing durable records the refund. If the deadline expires after the
    /// store committed the cancellation but before `apply` returned, the caller
    /// sees a transient repository error, no refund is attempted, and a retry
    /// answers `AlreadyCancelled`. That refund has to be reconciled by hand.
    Inline,
    /// Commit the cancelled event to the outbox; the refund processor settles it.
    #[default]
    Outbox,
}

impl RefundMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundMode::Inline => "inline",
            RefundMode::Outbox => "outbox",
        }
    }
}

impl FromStr for RefundMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(RefundMode::Inline),
            "outbox" => Ok(RefundMode::Outbox),
            other => Err(format!("unknown refund mode '{other}' (expected inline|outbox)")),
        }
    }
}

/// What happened to the refund of a committed cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundSettlement {
    /// Prorated refund was zero; billing was not called.
    NotRequired,
    /// Billing accepted the refund.
    Settled,
    /// Refund committed to the outbox alongside the cancellation.
    Enqueued { message_id: OutboxMessageId },
    /// Cancellation stands; the refund still needs settling.
    Failed(RefundFailure),
}

impl RefundSettlement {
    pub fn label(&self) -> &'static str {
        match self {
            RefundSettlement::NotRequired => "not_required",
            RefundSettlement::Settled => "settled",
            RefundSettlement::Enqueued { .. } => "enqueued",
            RefundSettlement::Failed(_) => "failed",
        }
    }
}

/// Result of a committed cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub event: SubscriptionCancelled,
    pub refund: RefundSettlement,
}

impl CancelOutcome {
    pub fn refund_error(&self) -> Option<&RefundFailure> {
        match &self.refund {
            RefundSettlement::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Cancel a subscription and settle its prorated refund.
///
/// Once the status write commits, `Cancelled` is final. A refund failure
/// after that point never rolls the cancellation back; it is returned inside
/// [`CancelOutcome`] instead.
pub struct CancelSubscription<R, B> {
    repository: R,
    billing: B,
    clock: Arc<dyn Clock>,
    billing_cycle_days: NonZeroU32,
    refund_mode: RefundMode,
}

impl<R, B> CancelSubscription<R, B>
where
    R: SubscriptionRepository,
    B: BillingClient,
{
    pub fn new(
        repository: R,
        billing: B,
        clock: Arc<dyn Clock>,
        billing_cycle_days: NonZeroU32,
        refund_mode: RefundMode,
    ) -> Self {
        Self {
            repository,
            billing,
            clock,
            billing_cycle_days,
            refund_mode,
        }
    }

    pub fn refund_mode(&self) -> RefundMode {
        self.refund_mode
    }

    #[instrument(
        skip(self, deadline),
        fields(
            subscription_id = %id,
            refund_mode = self.refund_mode.as_str(),
            refund_cents = tracing::field::Empty
        ),
        err
    )]
    pub async fn execute(&self, id: &SubscriptionId, deadline: Deadline) -> Result<CancelOutcome, WorkflowError> {
        let mut subscription = deadline
            .run("find_by_id", self.repository.find_by_id(id))
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => WorkflowError::Domain(DomainError::not_found(id.as_str())),
                other => WorkflowError::repository("find_by_id", id, other),
            })?;

        // AlreadyCancelled surfaces verbatim: nothing written, nothing refunded.
        let event = subscription.cancel(&*self.clock, self.billing_cycle_days)?;
        let refund_cents = event.refund_cents;
        Span::current().record("refund_cents", refund_cents);

        let mut writes = vec![
            self.repository
                .save(&subscription)
                .map_err(|e| WorkflowError::repository("save", id, e))?,
        ];

        let mut enqueued = None;
        if self.refund_mode == RefundMode::Outbox && refund_cents > 0 {
            let envelope = EventEnvelope::from_typed(AGGREGATE_TYPE, &event)?;
            let message = OutboxMessage::new(envelope, self.clock.now());
            enqueued = Some(message.id);
            writes.push(PendingWrite::Outbox(message));
        }

        deadline
            .run("apply", self.repository.apply(writes))
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict { .. } => {
                    warn!(subscription_id = %id, "lost cancellation race, already cancelled");
                    WorkflowError::Domain(DomainError::already_cancelled(id.as_str()))
                }
                RepositoryError::NotFound(_) => WorkflowError::Domain(DomainError::not_found(id.as_str())),
                other => WorkflowError::repository("apply", id, other),
            })?;

        info!(subscription_id = %id, refund_cents, "subscription cancelled");

        let refund = if refund_cents == 0 {
            RefundSettlement::NotRequired
        } else if let Some(message_id) = enqueued {
            info!(subscription_id = %id, %message_id, refund_cents, "refund enqueued");
            RefundSettlement::Enqueued { message_id }
        } else {
            self.settle_inline(id, refund_cents, deadline).await
        };

        Ok(CancelOutcome { event, refund })
    }

    async fn settle_inline(&self, id: &SubscriptionId, amount_cents: i64, deadline: Deadline) -> RefundSettlement {
        match deadline
            .run("process_refund", self.billing.process_refund(amount_cents))
            .await
        {
            Ok(()) => {
                info!(subscription_id = %id, amount_cents, "refund settled");
                RefundSettlement::Settled
            }
            Err(source) => {
                error!(
                    subscription_id = %id,
                    amount_cents,
                    transient = source.is_transient(),
                    error = %source,
                    "refund failed after cancellation committed"
                );
                RefundSettlement::Failed(RefundFailure {
                    subscription_id: id.clone(),
                    amount_cents,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_mode_parses_case_insensitively() {
        assert_eq!("inline".parse::<RefundMode>(), Ok(RefundMode::Inline));
        assert_eq!(" OUTBOX ".parse::<RefundMode>(), Ok(RefundMode::Outbox));
        assert!("later".parse::<RefundMode>().is_err());
        assert_eq!(RefundMode::default(), RefundMode::Outbox);
    }

    #[test]
    fn settlement_labels() {
        assert_eq!(RefundSettlement::NotRequired.label(), "not_required");
        assert_eq!(RefundSettlement::Settled.label(), "settled");
        assert_eq!(
            RefundSettlement::Enqueued {
                message_id: OutboxMessageId::new()
            }
            .label(),
            "enqueued"
        );
    }
}
