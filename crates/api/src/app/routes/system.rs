use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "storage": services.storage,
        "refund_mode": services.cancel.refund_mode().as_str(),
    }))
}
