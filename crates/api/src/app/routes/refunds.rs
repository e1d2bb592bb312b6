use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use submgr_core::Clock;
use submgr_infra::outbox::{OutboxMessageId, OutboxStore};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:id/requeue", post(requeue_dead_letter))
}

pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    match services.outbox.list_dead_letters(query.limit_or(100)).await {
        Ok(messages) => {
            let items = messages.iter().map(dto::outbox_message_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::outbox_error_to_response(e),
    }
}

pub async fn requeue_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let id = OutboxMessageId::from_uuid(id);
    match services.outbox.requeue_dead_letter(id, services.clock.now()).await {
        Ok(message) => {
            tracing::info!(message_id = %id, subscription_id = message.subscription_id(), "dead letter requeued");
            (StatusCode::OK, Json(dto::outbox_message_to_json(&message))).into_response()
        }
        Err(e) => errors::outbox_error_to_response(e),
    }
}
