use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use submgr_core::{CustomerId, PlanId};
use submgr_infra::outbox::OutboxMessage;
use submgr_infra::{CreateSubscriptionRequest, RefundSettlement};
use submgr_subscription::Subscription;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionBody {
    pub customer_id: String,
    pub plan_id: String,
    pub price_cents: i64,
}

impl From<CreateSubscriptionBody> for CreateSubscriptionRequest {
    fn from(body: CreateSubscriptionBody) -> Self {
        CreateSubscriptionRequest {
            customer_id: CustomerId::new(body.customer_id),
            plan_id: PlanId::new(body.plan_id),
            price_cents: body.price_cents,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, 500)
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn subscription_to_json(s: &Subscription) -> JsonValue {
    json!({
        "id": s.id().as_str(),
        "customer_id": s.customer_id().as_str(),
        "plan_id": s.plan_id().as_str(),
        "price_cents": s.price_cents(),
        "status": s.status().as_str(),
        "start_date": s.start_date(),
    })
}

pub fn settlement_to_json(settlement: &RefundSettlement) -> JsonValue {
    match settlement {
        RefundSettlement::NotRequired | RefundSettlement::Settled => json!({ "status": settlement.label() }),
        RefundSettlement::Enqueued { message_id } => json!({
            "status": settlement.label(),
            "message_id": message_id.to_string(),
        }),
        RefundSettlement::Failed(failure) => json!({
            "status": settlement.label(),
            "amount_cents": failure.amount_cents,
            "transient": failure.is_transient(),
            "error": failure.source.to_string(),
        }),
    }
}

pub fn outbox_message_to_json(m: &OutboxMessage) -> JsonValue {
    json!({
        "id": m.id.to_string(),
        "subscription_id": m.subscription_id(),
        "event_type": m.envelope.event_type(),
        "status": m.status,
        "attempts": m.attempts,
        "next_attempt_at": m.next_attempt_at,
        "created_at": m.created_at,
        "updated_at": m.updated_at,
        "history": m.history,
    })
}
