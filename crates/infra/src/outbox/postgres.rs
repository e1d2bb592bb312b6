//! Postgres-backed outbox.
//!
//! The full `OutboxMessage` is stored as JSONB in `message`; `status` and
//! `next_attempt_at` are duplicated into columns so claiming can use an index.
//!
//! Claiming selects due rows `FOR UPDATE SKIP LOCKED`, pushes their
//! `next_attempt_at` forward by the lease and stamps a fresh `claim_token` in
//! the same statement. Renewals and outcome writes are conditional on that
//! token, so once a lease expires and another processor claims the row, the
//! previous holder can neither start a new attempt nor overwrite the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use super::store::{DEFAULT_CLAIM_LEASE_SECS, OutboxStore};
use super::types::{OutboxError, OutboxMessage, OutboxMessageId};

pub(crate) const OUTBOX_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subscription_outbox (
        id UUID PRIMARY KEY,
        subscription_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_attempt_at TIMESTAMPTZ NOT NULL,
        claim_token UUID,
        message JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    ALTER TABLE subscription_outbox ADD COLUMN IF NOT EXISTS claim_token UUID
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS subscription_outbox_ready_idx
        ON subscription_outbox (status, next_attempt_at)
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
    claim_lease: chrono::Duration,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    pub fn with_claim_lease(mut self, lease: chrono::Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Create the outbox table and index if missing.
    pub async fn migrate(&self) -> Result<(), OutboxError> {
        for statement in OUTBOX_DDL {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

/// Insert a message inside a caller-owned transaction.
///
/// Used by the subscription repository so the outbox row commits with the
/// status change.
pub(crate) async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &OutboxMessage,
) -> Result<(), OutboxError> {
    let body = encode(message)?;

    sqlx::query(
        r#"
        INSERT INTO subscription_outbox (
            id,
            subscription_id,
            event_type,
            status,
            attempts,
            next_attempt_at,
            message,
            created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(message.subscription_id())
    .bind(message.envelope.event_type())
    .bind(message.status.label())
    .bind(message.attempts as i32)
    .bind(message.next_attempt_at)
    .bind(&body)
    .bind(message.created_at)
    .bind(message.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            OutboxError::AlreadyExists(message.id)
        } else {
            map_sqlx_error("insert_outbox_message", e)
        }
    })?;

    Ok(())
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self), fields(claimed = tracing::field::Empty), err)]
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let lease_until = now + self.claim_lease;
        let token = Uuid::now_v7();

        let rows = sqlx::query(
            r#"
            UPDATE subscription_outbox
            SET next_attempt_at = $2, claim_token = $4
            WHERE id IN (
                SELECT id
                FROM subscription_outbox
                WHERE status IN ('pending', 'retrying')
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING message
            "#,
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit as i64)
        .bind(token)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_ready", e))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut message = decode_row(&row)?;
            message.next_attempt_at = lease_until;
            message.claim_token = Some(token);
            claimed.push(message);
        }
        claimed.sort_by_key(|m| (m.created_at, m.id));

        Span::current().record("claimed", claimed.len());
        Ok(claimed)
    }

    #[instrument(skip(self, message), fields(message_id = %message.id), err)]
    async fn renew_claim(&self, message: &mut OutboxMessage, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let Some(token) = message.claim_token else {
            return Err(OutboxError::LeaseLost(message.id));
        };
        let lease_until = now + self.claim_lease;

        let result = sqlx::query(
            r#"
            UPDATE subscription_outbox
            SET next_attempt_at = $3
            WHERE id = $1
              AND claim_token = $2
              AND next_attempt_at > $4
              AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(token)
        .bind(lease_until)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("renew_claim", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::LeaseLost(message.id));
        }
        message.next_attempt_at = lease_until;
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = %message.id, status = message.status.label()), err)]
    async fn update(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        let released = OutboxMessage {
            claim_token: None,
            ..message.clone()
        };
        let body = encode(&released)?;

        let result = sqlx::query(
            r#"
            UPDATE subscription_outbox
            SET status = $2,
                attempts = $3,
                next_attempt_at = $4,
                message = $5,
                updated_at = $6,
                claim_token = NULL
            WHERE id = $1
              AND claim_token IS NOT DISTINCT FROM $7
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.status.label())
        .bind(message.attempts as i32)
        .bind(message.next_attempt_at)
        .bind(&body)
        .bind(message.updated_at)
        .bind(message.claim_token)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_outbox_message", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get(message.id).await? {
            Some(_) => Err(OutboxError::LeaseLost(message.id)),
            None => Err(OutboxError::NotFound(message.id)),
        }
    }

    async fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxError> {
        let row = sqlx::query("SELECT message FROM subscription_outbox WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_outbox_message", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let rows = sqlx::query(
            r#"
            SELECT message
            FROM subscription_outbox
            WHERE status = 'dead_lettered'
            ORDER BY updated_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dead_letters", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), fields(message_id = %id), err)]
    async fn requeue_dead_letter(&self, id: OutboxMessageId, now: DateTime<Utc>) -> Result<OutboxMessage, OutboxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT message FROM subscription_outbox WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("requeue_dead_letter", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(OutboxError::NotFound(id));
        };

        let mut message = decode_row(&row)?;
        if let Err(e) = message.requeue(now) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }

        sqlx::query(
            r#"
            UPDATE subscription_outbox
            SET status = $2, attempts = 0, next_attempt_at = $3, message = $4, updated_at = $3, claim_token = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(message.status.label())
        .bind(now)
        .bind(encode(&message)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("requeue_dead_letter", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(message)
    }
}

fn encode(message: &OutboxMessage) -> Result<JsonValue, OutboxError> {
    serde_json::to_value(message).map_err(|e| OutboxError::Serialization(e.to_string()))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<OutboxMessage, OutboxError> {
    let body: JsonValue = row
        .try_get("message")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    serde_json::from_value(body).map_err(|e| OutboxError::Serialization(e.to_string()))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Map sqlx errors to `OutboxError`.
///
/// Connection-level failures (I/O, pool timeout, closed pool) are transient;
/// everything else the database rejects is not.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => OutboxError::storage(
            format!("database error in {}: {}", operation, db_err.message()),
            false,
        ),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            OutboxError::storage(format!("connection failure in {}: {}", operation, err), true)
        }
        _ => OutboxError::storage(format!("sqlx error in {}: {}", operation, err), false),
    }
}
