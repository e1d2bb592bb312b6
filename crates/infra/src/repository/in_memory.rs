use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use submgr_core::SubscriptionId;
use submgr_subscription::Subscription;

use crate::outbox::{InMemoryOutboxStore, OutboxError, OutboxMessage};
use crate::ports::{PendingWrite, RepositoryError, SubscriptionRepository, WriteCondition};

use super::record::SubscriptionRecord;

/// In-memory subscription repository for tests/dev.
///
/// `apply` checks every condition against the current rows (and the earlier
/// writes of the same batch) before touching anything, so a batch either
/// lands whole or not at all.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<HashMap<SubscriptionId, SubscriptionRecord>>,
    outbox: Option<Arc<InMemoryOutboxStore>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `PendingWrite::Outbox` entries into `outbox`.
    pub fn with_outbox(outbox: Arc<InMemoryOutboxStore>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            outbox: Some(outbox),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Raw stored row, for assertions.
    pub fn record(&self, id: &SubscriptionId) -> Option<SubscriptionRecord> {
        self.rows.read().ok().and_then(|rows| rows.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_condition(
    current: Option<&SubscriptionRecord>,
    record: &SubscriptionRecord,
    condition: WriteCondition,
) -> Result<(), RepositoryError> {
    let satisfied = match (condition, current) {
        (WriteCondition::Absent, None) => true,
        (WriteCondition::Absent, Some(_)) => false,
        (WriteCondition::StatusIs(expected), Some(row)) => row.status == expected.as_str(),
        (WriteCondition::StatusIs(_), None) => {
            return Err(RepositoryError::NotFound(SubscriptionId::new(record.id.clone())));
        }
    };

    if satisfied {
        Ok(())
    } else {
        Err(RepositoryError::Conflict {
            id: SubscriptionId::new(record.id.clone()),
            expected: condition.to_string(),
        })
    }
}

fn outbox_error(err: OutboxError) -> RepositoryError {
    RepositoryError::storage(format!("outbox write rejected: {err}"), err.is_transient())
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Subscription, RepositoryError> {
        let record = self
            .rows
            .read()
            .map_err(|_| RepositoryError::storage("repository lock poisoned", false))?
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;

        Subscription::try_from(record)
    }

    async fn apply(&self, writes: Vec<PendingWrite>) -> Result<(), RepositoryError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| RepositoryError::storage("repository lock poisoned", false))?;

        // Validate the whole batch against a staged view first.
        let mut staged: HashMap<SubscriptionId, SubscriptionRecord> = HashMap::new();
        let mut messages: Vec<OutboxMessage> = Vec::new();

        for write in writes {
            match write {
                PendingWrite::Subscription { record, condition } => {
                    let id = SubscriptionId::new(record.id.clone());
                    let current = staged.get(&id).or_else(|| rows.get(&id));
                    check_condition(current, &record, condition)?;
                    staged.insert(id, record);
                }
                PendingWrite::Outbox(message) => messages.push(message),
            }
        }

        if !messages.is_empty() {
            let outbox = self
                .outbox
                .as_ref()
                .ok_or_else(|| RepositoryError::storage("no outbox configured for this repository", false))?;
            outbox.ensure_absent(&messages).map_err(outbox_error)?;
            outbox.insert_all(messages).map_err(outbox_error)?;
        }

        rows.extend(staged);
        Ok(())
    }
}
