//! Outbox storage port and the in-memory adapter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{OutboxError, OutboxMessage, OutboxMessageId, OutboxStatus};

/// Durable queue of refund messages.
///
/// `claim_ready` stamps each claimed message with a claim token and hides it
/// for a lease. The holder renews the lease before every delivery attempt and
/// records the outcome under the same token, so a message whose lease expired
/// and was claimed elsewhere can no longer be delivered by the old holder.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` due messages, oldest schedule first.
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Extend the lease on a claimed message from `now`.
    ///
    /// Fails with `LeaseLost` once the lease has expired or the message was
    /// claimed again. On success `message.next_attempt_at` holds the new lease end.
    async fn renew_claim(&self, message: &mut OutboxMessage, now: DateTime<Utc>) -> Result<(), OutboxError>;

    /// Persist a message's new state after an attempt and release its claim.
    ///
    /// Fails with `LeaseLost` when the stored claim token differs from the message's.
    async fn update(&self, message: &OutboxMessage) -> Result<(), OutboxError>;

    async fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxError>;

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Move a dead letter back to pending with a fresh attempt budget.
    async fn requeue_dead_letter(&self, id: OutboxMessageId, now: DateTime<Utc>) -> Result<OutboxMessage, OutboxError>;

    async fn record_delivered(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        self.update(message).await
    }

    async fn record_retry(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        self.update(message).await
    }

    async fn dead_letter(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        self.update(message).await
    }
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        (**self).claim_ready(now, limit).await
    }

    async fn renew_claim(&self, message: &mut OutboxMessage, now: DateTime<Utc>) -> Result<(), OutboxError> {
        (**self).renew_claim(message, now).await
    }

    async fn update(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        (**self).update(message).await
    }

    async fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxError> {
        (**self).get(id).await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        (**self).list_dead_letters(limit).await
    }

    async fn requeue_dead_letter(&self, id: OutboxMessageId, now: DateTime<Utc>) -> Result<OutboxMessage, OutboxError> {
        (**self).requeue_dead_letter(id, now).await
    }

    async fn record_delivered(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        (**self).record_delivered(message).await
    }

    async fn record_retry(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        (**self).record_retry(message).await
    }

    async fn dead_letter(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        (**self).dead_letter(message).await
    }
}

/// Default visibility lease for claimed messages, in seconds.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 30;

/// In-memory outbox for tests/dev.
#[derive(Debug)]
pub struct InMemoryOutboxStore {
    messages: RwLock<HashMap<OutboxMessageId, OutboxMessage>>,
    claim_lease: chrono::Duration,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_claim_lease(mut self, lease: chrono::Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Snapshot of every message, oldest first.
    pub fn all(&self) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut all: Vec<_> = self.read()?.values().cloned().collect();
        all.sort_by_key(|m| (m.created_at, m.id));
        Ok(all)
    }

    /// Insert a batch, all or nothing.
    pub(crate) fn insert_all(&self, batch: Vec<OutboxMessage>) -> Result<(), OutboxError> {
        let mut messages = self.write()?;
        Self::check_absent(&messages, &batch)?;
        for message in batch {
            messages.insert(message.id, message);
        }
        Ok(())
    }

    /// Reject a batch containing ids already stored.
    pub(crate) fn ensure_absent(&self, batch: &[OutboxMessage]) -> Result<(), OutboxError> {
        let messages = self.read()?;
        Self::check_absent(&messages, batch)
    }

    fn check_absent(
        messages: &HashMap<OutboxMessageId, OutboxMessage>,
        batch: &[OutboxMessage],
    ) -> Result<(), OutboxError> {
        match batch.iter().find(|m| messages.contains_key(&m.id)) {
            Some(existing) => Err(OutboxError::AlreadyExists(existing.id)),
            None => Ok(()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<OutboxMessageId, OutboxMessage>>, OutboxError> {
        self.messages
            .read()
            .map_err(|_| OutboxError::storage("outbox lock poisoned", false))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<OutboxMessageId, OutboxMessage>>, OutboxError> {
        self.messages
            .write()
            .map_err(|_| OutboxError::storage("outbox lock poisoned", false))
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut messages = self.write()?;

        let mut ready: Vec<&mut OutboxMessage> = messages.values_mut().filter(|m| m.is_ready(now)).collect();
        ready.sort_by_key(|m| (m.next_attempt_at, m.created_at));

        let lease_until = now + self.claim_lease;
        let token = Uuid::now_v7();
        Ok(ready
            .into_iter()
            .take(limit)
            .map(|m| {
                m.next_attempt_at = lease_until;
                m.claim_token = Some(token);
                m.clone()
            })
            .collect())
    }

    async fn renew_claim(&self, message: &mut OutboxMessage, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut messages = self.write()?;
        let stored = messages
            .get_mut(&message.id)
            .ok_or(OutboxError::NotFound(message.id))?;

        match message.claim_token {
            Some(token) if stored.holds_lease(token, now) => {
                stored.next_attempt_at = now + self.claim_lease;
                message.next_attempt_at = stored.next_attempt_at;
                Ok(())
            }
            _ => Err(OutboxError::LeaseLost(message.id)),
        }
    }

    async fn update(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        let mut messages = self.write()?;
        match messages.get_mut(&message.id) {
            Some(stored) if stored.claim_token != message.claim_token => Err(OutboxError::LeaseLost(message.id)),
            Some(stored) => {
                *stored = OutboxMessage {
                    claim_token: None,
                    ..message.clone()
                };
                Ok(())
            }
            None => Err(OutboxError::NotFound(message.id)),
        }
    }

    async fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut dead: Vec<_> = self
            .read()?
            .values()
            .filter(|m| matches!(m.status, OutboxStatus::DeadLettered { .. }))
            .cloned()
            .collect();
        dead.sort_by_key(|m| (m.updated_at, m.id));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn requeue_dead_letter(&self, id: OutboxMessageId, now: DateTime<Utc>) -> Result<OutboxMessage, OutboxError> {
        let mut messages = self.write()?;
        let message = messages.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        message.requeue(now)?;
        Ok(message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::types::RetryPolicy;
    use chrono::TimeZone;
    use submgr_events::EventEnvelope;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn message_at(now: DateTime<Utc>) -> OutboxMessage {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            "sub-123",
            "subscription",
            "subscription.cancelled",
            1,
            now,
            serde_json::json!({}),
        );
        OutboxMessage::new(envelope, now)
    }

    #[tokio::test]
    async fn claimed_messages_are_hidden_for_the_lease() {
        let store = InMemoryOutboxStore::new().with_claim_lease(chrono::Duration::seconds(10));
        store.insert_all(vec![message_at(t0())]).unwrap();

        let first = store.claim_ready(t0(), 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(store.claim_ready(t0(), 10).await.unwrap().is_empty());

        // Lease expiry makes an abandoned claim visible again.
        let reclaimed = store
            .claim_ready(t0() + chrono::Duration::seconds(10), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn claim_respects_limit_and_order() {
        let store = InMemoryOutboxStore::new();
        let older = message_at(t0());
        let newer = message_at(t0() + chrono::Duration::seconds(1));
        store.insert_all(vec![newer.clone(), older.clone()]).unwrap();

        let claimed = store
            .claim_ready(t0() + chrono::Duration::seconds(5), 1)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, older.id);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryOutboxStore::new();
        let msg = message_at(t0());
        store.insert_all(vec![msg.clone()]).unwrap();
        assert_eq!(store.insert_all(vec![msg.clone()]), Err(OutboxError::AlreadyExists(msg.id)));
        assert_eq!(store.ensure_absent(&[msg.clone()]), Err(OutboxError::AlreadyExists(msg.id)));
    }

    #[tokio::test]
    async fn dead_letters_can_be_listed_and_requeued() {
        let store = InMemoryOutboxStore::new();
        let mut msg = message_at(t0());
        store.insert_all(vec![msg.clone()]).unwrap();

        msg.begin_attempt(t0());
        msg.mark_failed("400 bad request".to_string(), false, &RetryPolicy::default(), t0(), t0());
        store.dead_letter(&msg).await.unwrap();

        let dead = store.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, msg.id);

        let requeued = store.requeue_dead_letter(msg.id, t0()).await.unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert!(store.list_dead_letters(10).await.unwrap().is_empty());
        assert_eq!(store.claim_ready(t0(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_unknown_message_is_not_found() {
        let store = InMemoryOutboxStore::new();
        let id = OutboxMessageId::new();
        assert_eq!(
            store.requeue_dead_letter(id, t0()).await,
            Err(OutboxError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn renewal_extends_the_lease_for_the_holder() {
        let store = InMemoryOutboxStore::new().with_claim_lease(chrono::Duration::seconds(10));
        store.insert_all(vec![message_at(t0())]).unwrap();

        let mut claimed = store.claim_ready(t0(), 10).await.unwrap().remove(0);
        assert!(claimed.claim_token.is_some());

        let later = t0() + chrono::Duration::seconds(8);
        store.renew_claim(&mut claimed, later).await.unwrap();
        assert_eq!(claimed.next_attempt_at, later + chrono::Duration::seconds(10));

        // Past the original lease but inside the renewed one.
        assert!(store
            .claim_ready(t0() + chrono::Duration::seconds(12), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stale_holder_cannot_renew_or_record_after_reclaim() {
        let store = InMemoryOutboxStore::new().with_claim_lease(chrono::Duration::seconds(10));
        store.insert_all(vec![message_at(t0())]).unwrap();

        let mut stale = store.claim_ready(t0(), 10).await.unwrap().remove(0);
        let after_lease = t0() + chrono::Duration::seconds(11);
        let fresh = store.claim_ready(after_lease, 10).await.unwrap().remove(0);
        assert_ne!(stale.claim_token, fresh.claim_token);

        assert_eq!(
            store.renew_claim(&mut stale, after_lease).await,
            Err(OutboxError::LeaseLost(stale.id))
        );

        stale.begin_attempt(after_lease);
        stale.mark_delivered(after_lease, after_lease);
        assert_eq!(
            store.record_delivered(&stale).await,
            Err(OutboxError::LeaseLost(stale.id))
        );

        // The current holder records its outcome and releases the claim.
        let mut current = fresh.clone();
        current.begin_attempt(after_lease);
        current.mark_delivered(after_lease, after_lease);
        store.record_delivered(&current).await.unwrap();

        let stored = store.get(current.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Delivered);
        assert_eq!(stored.claim_token, None);
    }

    #[tokio::test]
    async fn expired_lease_cannot_be_renewed() {
        let store = InMemoryOutboxStore::new().with_claim_lease(chrono::Duration::seconds(10));
        store.insert_all(vec![message_at(t0())]).unwrap();

        let mut claimed = store.claim_ready(t0(), 10).await.unwrap().remove(0);
        let id = claimed.id;
        assert_eq!(
            store
                .renew_claim(&mut claimed, t0() + chrono::Duration::seconds(10))
                .await,
            Err(OutboxError::LeaseLost(id))
        );
    }
}
