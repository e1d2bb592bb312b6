//! Postgres-backed subscription repository.
//!
//! ## Conditional writes
//!
//! `apply` runs the whole batch in one transaction:
//!
//! | Write | SQL | Zero rows affected |
//! |-------|-----|--------------------|
//! | `Absent` | `INSERT .. ON CONFLICT (id) DO NOTHING` | `Conflict` (id already taken) |
//! | `StatusIs(s)` | `UPDATE .. WHERE id = $1 AND status = s` | `Conflict` or `NotFound` |
//! | `Outbox` | `INSERT INTO subscription_outbox` | n/a |
//!
//! Any failure rolls the transaction back, so the outbox row never outlives
//! a lost status update.
//!
//! ## Error mapping
//!
//! | SQLx error | `RepositoryError` |
//! |------------|-------------------|
//! | Database, code `23505` on insert | `Conflict` |
//! | Database, code `40001` / `40P01` | `Storage { transient: true }` |
//! | Database, other | `Storage { transient: false }` |
//! | Io / PoolTimedOut / PoolClosed | `Storage { transient: true }` |
//! | Other | `Storage { transient: false }` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{Span, instrument};

use submgr_core::SubscriptionId;
use submgr_subscription::Subscription;

use crate::outbox::OutboxError;
use crate::outbox::postgres::{OUTBOX_DDL, insert_message};
use crate::ports::{PendingWrite, RepositoryError, SubscriptionRepository, WriteCondition};

use super::record::SubscriptionRecord;

const SUBSCRIPTIONS_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY,
        customer_id TEXT NOT NULL,
        plan_id TEXT NOT NULL,
        price_cents BIGINT NOT NULL CHECK (price_cents > 0),
        status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'CANCELLED')),
        start_date TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS subscriptions_customer_id_idx
        ON subscriptions (customer_id)
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionRepository {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `subscriptions` and `subscription_outbox` tables if missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        for statement in SUBSCRIPTIONS_DDL.iter().chain(OUTBOX_DDL) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn apply_subscription(
        tx: &mut Transaction<'_, Postgres>,
        record: &SubscriptionRecord,
        condition: WriteCondition,
    ) -> Result<(), RepositoryError> {
        let result = match condition {
            WriteCondition::Absent => sqlx::query(
                r#"
                INSERT INTO subscriptions (
                    id,
                    customer_id,
                    plan_id,
                    price_cents,
                    status,
                    start_date
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&record.id)
            .bind(&record.customer_id)
            .bind(&record.plan_id)
            .bind(record.price_cents)
            .bind(&record.status)
            .bind(record.start_date)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict {
                        id: SubscriptionId::new(record.id.clone()),
                        expected: condition.to_string(),
                    }
                } else {
                    map_sqlx_error("insert_subscription", e)
                }
            })?,

            WriteCondition::StatusIs(expected) => sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = $2
                WHERE id = $1 AND status = $3
                "#,
            )
            .bind(&record.id)
            .bind(&record.status)
            .bind(expected.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_subscription", e))?,
        };

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let id = SubscriptionId::new(record.id.clone());
        if let WriteCondition::StatusIs(_) = condition {
            let exists: Option<(String,)> = sqlx::query_as("SELECT status FROM subscriptions WHERE id = $1")
                .bind(&record.id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("check_subscription", e))?;
            if exists.is_none() {
                return Err(RepositoryError::NotFound(id));
            }
        }

        Err(RepositoryError::Conflict {
            id,
            expected: condition.to_string(),
        })
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    #[instrument(skip(self), fields(subscription_id = %id), err)]
    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Subscription, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                customer_id,
                plan_id,
                price_cents,
                status,
                start_date
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_id", e))?;

        let row = row.ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        let record = SubscriptionRecord::from_row(&row).map_err(|e| RepositoryError::Corrupt {
            id: id.to_string(),
            reason: format!("failed to decode subscription row: {e}"),
        })?;

        Subscription::try_from(record)
    }

    #[instrument(skip(self, writes), fields(write_count = writes.len(), committed = tracing::field::Empty), err)]
    async fn apply(&self, writes: Vec<PendingWrite>) -> Result<(), RepositoryError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for write in &writes {
            let outcome = match write {
                PendingWrite::Subscription { record, condition } => {
                    Self::apply_subscription(&mut tx, record, *condition).await
                }
                PendingWrite::Outbox(message) => insert_message(&mut tx, message).await.map_err(outbox_error),
            };

            if let Err(e) = outcome {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed", true);
        Ok(())
    }
}

fn outbox_error(err: OutboxError) -> RepositoryError {
    RepositoryError::storage(format!("outbox write rejected: {err}"), err.is_transient())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            // Serialization failure / deadlock: safe to retry the whole batch.
            let transient = matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"));
            RepositoryError::storage(msg, transient)
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            RepositoryError::storage(format!("connection failure in {}: {}", operation, err), true)
        }
        _ => RepositoryError::storage(format!("sqlx error in {}: {}", operation, err), false),
    }
}
