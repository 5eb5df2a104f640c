//! Administrative endpoints for inspecting and clearing rate limit state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::ratelimit::GuardedLimiter;

#[derive(Debug, Serialize)]
struct KeySnapshot {
    key: String,
    count: usize,
    oldest: Option<f64>,
}

/// Router serving `GET`/`DELETE /admin/rate-limits/{key}`.
pub fn router(limiter: Arc<GuardedLimiter>) -> Router {
    Router::new()
        .route(
            "/admin/rate-limits/{key}",
            get(snapshot_key).delete(reset_key),
        )
        .with_state(limiter)
}

async fn snapshot_key(
    State(limiter): State<Arc<GuardedLimiter>>,
    Path(key): Path<String>,
) -> Response {
    match limiter.snapshot(&key).await {
        Ok(snapshot) => Json(KeySnapshot {
            key,
            count: snapshot.count,
            oldest: snapshot.oldest,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn reset_key(
    State(limiter): State<Arc<GuardedLimiter>>,
    Path(key): Path<String>,
) -> Response {
    match limiter.reset(&key).await {
        Ok(()) => {
            info!(key = %key, "Rate limit state reset by admin");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => e.into_response(),
    }
}
