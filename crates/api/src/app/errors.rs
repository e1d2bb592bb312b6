use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use submgr_core::DomainError;
use submgr_infra::WorkflowError;
use submgr_infra::outbox::OutboxError;

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    match err {
        WorkflowError::Domain(e) => domain_error_to_response(e),
        WorkflowError::Event(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
        other if other.is_transient() => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", other.to_string())
        }
        other => json_error(StatusCode::BAD_GATEWAY, "dependency_error", other.to_string()),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        DomainError::AlreadyCancelled(_) => json_error(StatusCode::CONFLICT, "already_cancelled", err.to_string()),
        DomainError::InvalidCustomer(_) | DomainError::InvalidPlan(_) | DomainError::InvalidPrice(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
    }
}

pub fn outbox_error_to_response(err: OutboxError) -> axum::response::Response {
    match err {
        OutboxError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        OutboxError::NotDeadLettered(_) => json_error(StatusCode::CONFLICT, "not_dead_lettered", err.to_string()),
        _ if err.is_transient() => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", err.to_string())
        }
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, "outbox_error", err.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
