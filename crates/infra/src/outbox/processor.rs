//! Refund processor: drains the outbox into the billing service.

use std::ops::AddAssign;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use submgr_core::Clock;
use submgr_subscription::SubscriptionCancelled;

use super::store::OutboxStore;
use super::types::{OutboxError, OutboxMessage, OutboxStatus, RetryPolicy};
use crate::deadline::Deadline;
use crate::ports::{BillingClient, BillingError};

/// Refund processor configuration.
#[derive(Debug, Clone)]
pub struct RefundProcessorConfig {
    /// How often the background loop polls for due messages
    pub poll_interval: Duration,
    /// Maximum messages claimed per pass
    pub batch_size: usize,
    /// Deadline for each billing call
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Name for logging
    pub name: String,
}

impl Default for RefundProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 16,
            attempt_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            name: "refund-processor".to_string(),
        }
    }
}

impl RefundProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Counters for processed messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub claimed: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Claimed messages skipped because another processor took them over
    pub lease_lost: u64,
}

impl AddAssign for ProcessorStats {
    fn add_assign(&mut self, rhs: Self) {
        self.claimed += rhs.claimed;
        self.delivered += rhs.delivered;
        self.retried += rhs.retried;
        self.dead_lettered += rhs.dead_lettered;
        self.lease_lost += rhs.lease_lost;
    }
}

/// Delivers committed `subscription.cancelled` events to billing as refunds.
///
/// Each claimed message is one delivery attempt: success marks it delivered,
/// a transient billing failure reschedules it with backoff until the retry
/// policy is exhausted, and anything permanent (4xx, undecodable payload)
/// dead-letters it immediately.
///
/// Before each attempt the claim is renewed; a message whose lease ran out
/// while earlier messages in the batch were being delivered is skipped and
/// left to whichever processor claimed it next. The billing call never
/// outlives the renewed lease.
pub struct RefundProcessor<S, B> {
    store: S,
    billing: B,
    clock: Arc<dyn Clock>,
    config: RefundProcessorConfig,
}

impl<S, B> RefundProcessor<S, B>
where
    S: OutboxStore,
    B: BillingClient,
{
    pub fn new(store: S, billing: B, clock: Arc<dyn Clock>, config: RefundProcessorConfig) -> Self {
        Self {
            store,
            billing,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RefundProcessorConfig {
        &self.config
    }

    /// Process one batch of due messages.
    #[instrument(skip(self), fields(processor = %self.config.name), err)]
    pub async fn run_once(&self) -> Result<ProcessorStats, OutboxError> {
        let batch = self
            .store
            .claim_ready(self.clock.now(), self.config.batch_size)
            .await?;

        let mut stats = ProcessorStats {
            claimed: batch.len() as u64,
            ..ProcessorStats::default()
        };

        for message in batch {
            let id = message.id;
            match self.deliver(message).await {
                Ok(OutboxStatus::Delivered) => stats.delivered += 1,
                Ok(OutboxStatus::Retrying { .. }) => stats.retried += 1,
                Ok(OutboxStatus::DeadLettered { .. }) => stats.dead_lettered += 1,
                Ok(OutboxStatus::Pending) => {}
                Err(OutboxError::LeaseLost(_)) => {
                    warn!(message_id = %id, "claim lost to another processor");
                    stats.lease_lost += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if stats.claimed > 0 {
            debug!(?stats, "refund batch processed");
        }
        Ok(stats)
    }

    async fn deliver(&self, mut message: OutboxMessage) -> Result<OutboxStatus, OutboxError> {
        let started = self.clock.now();
        self.store.renew_claim(&mut message, started).await?;
        message.begin_attempt(started);

        let event: SubscriptionCancelled = match message.envelope.decode(SubscriptionCancelled::EVENT_TYPE) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    message_id = %message.id,
                    subscription_id = message.subscription_id(),
                    error = %e,
                    "undecodable refund message, dead-lettering"
                );
                message.mark_failed(e.to_string(), false, &self.config.retry_policy, started, self.clock.now());
                self.store.dead_letter(&message).await?;
                return Ok(message.status);
            }
        };

        let lease_left = (message.next_attempt_at - started).to_std().unwrap_or_default();
        let deadline = Deadline::after(self.config.attempt_timeout).min(Deadline::after(lease_left));
        let result: Result<(), BillingError> = deadline
            .run("process_refund", self.billing.process_refund(event.refund_cents))
            .await;
        let finished = self.clock.now();

        match result {
            Ok(()) => {
                message.mark_delivered(started, finished);
                self.store.record_delivered(&message).await?;
                info!(
                    message_id = %message.id,
                    subscription_id = %event.subscription_id,
                    amount_cents = event.refund_cents,
                    attempt = message.attempts,
                    "refund settled"
                );
            }
            Err(e) => {
                message.mark_failed(e.to_string(), e.is_transient(), &self.config.retry_policy, started, finished);
                match &message.status {
                    OutboxStatus::Retrying { attempt, .. } => {
                        self.store.record_retry(&message).await?;
                        warn!(
                            message_id = %message.id,
                            subscription_id = %event.subscription_id,
                            amount_cents = event.refund_cents,
                            attempt = *attempt,
                            next_attempt_at = %message.next_attempt_at,
                            error = %e,
                            "refund attempt failed, retry scheduled"
                        );
                    }
                    _ => {
                        self.store.dead_letter(&message).await?;
                        error!(
                            message_id = %message.id,
                            subscription_id = %event.subscription_id,
                            amount_cents = event.refund_cents,
                            attempts = message.attempts,
                            transient = e.is_transient(),
                            error = %e,
                            "refund dead-lettered"
                        );
                    }
                }
            }
        }

        Ok(message.status)
    }
}

impl<S, B> RefundProcessor<S, B>
where
    S: OutboxStore + 'static,
    B: BillingClient + 'static,
{
    /// Run the processor on the tokio runtime until shutdown.
    pub fn spawn(self) -> RefundProcessorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ProcessorStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            let name = self.config.name.clone();
            info!(processor = %name, "refund processor started");

            loop {
                match self.run_once().await {
                    Ok(batch) => {
                        if let Ok(mut total) = stats_clone.lock() {
                            *total += batch;
                        }
                    }
                    Err(e) => warn!(processor = %name, error = %e, "refund pass failed"),
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            info!(processor = %name, "refund processor stopped");
        });

        RefundProcessorHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

/// Handle to control a running refund processor.
#[derive(Debug)]
pub struct RefundProcessorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl RefundProcessorHandle {
    /// Request graceful shutdown and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }

    /// Totals since the processor started.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }
}
