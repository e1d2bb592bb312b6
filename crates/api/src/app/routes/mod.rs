use axum::Router;

pub mod refunds;
pub mod subscriptions;
pub mod system;

/// Router for all subscription and refund endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/subscriptions", subscriptions::router())
        .nest("/refunds", refunds::router())
}
