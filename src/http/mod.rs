//! HTTP dispatcher: middleware, admin endpoints and server.

mod admin;
mod middleware;
mod server;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;

use crate::error::WindowGuardError;

pub use admin::router as admin_router;
pub use middleware::{
    client_key, enforce_rate_limit, log_requests, rejection_detail, ProtectedRoute,
    RateLimitState,
};
pub use server::{wait_for_shutdown, HttpServer};

/// Layer the protected application with rate limiting and request logging.
///
/// Admin routes are not part of this router; serve [`admin_router`] on a
/// separate listener.
pub fn build_router(protected: Router, state: RateLimitState) -> Router {
    protected
        .layer(axum::middleware::from_fn_with_state(state, enforce_rate_limit))
        .layer(axum::middleware::from_fn(log_requests))
}

impl IntoResponse for WindowGuardError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            WindowGuardError::InvalidKey | WindowGuardError::InvalidTimestamp(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            WindowGuardError::BackendUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Rate limiter unavailable.".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error.".to_string(),
            ),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
