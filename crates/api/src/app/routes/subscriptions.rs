use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use submgr_core::{DomainError, SubscriptionId};
use submgr_infra::{RepositoryError, SubscriptionRepository};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_subscription))
        .route("/:id", get(get_subscription))
        .route("/:id/cancel", post(cancel_subscription))
}

pub async fn create_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateSubscriptionBody>,
) -> axum::response::Response {
    match services.create.execute(body.into(), services.deadline()).await {
        Ok((subscription, event)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "subscription": dto::subscription_to_json(&subscription),
                "event": event,
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = SubscriptionId::new(id);
    match services
        .deadline()
        .run("find_by_id", services.repository.find_by_id(&id))
        .await
    {
        Ok(subscription) => (StatusCode::OK, Json(dto::subscription_to_json(&subscription))).into_response(),
        Err(RepositoryError::NotFound(_)) => errors::domain_error_to_response(DomainError::not_found(id.as_str())),
        Err(e) if e.is_transient() => {
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", e.to_string())
        }
        Err(e) => errors::json_error(StatusCode::BAD_GATEWAY, "dependency_error", e.to_string()),
    }
}

pub async fn cancel_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = SubscriptionId::new(id);
    match services.cancel.execute(&id, services.deadline()).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "event": outcome.event,
                "refund": dto::settlement_to_json(&outcome.refund),
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
