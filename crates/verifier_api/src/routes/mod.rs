//! API routes
//!
//! - `verify`: single-address verification
//! - `batch`: batch, streaming, and database-driven verification
//! - `results`: cached verdict queries
//! - `health`: liveness and readiness probes

pub mod batch;
pub mod health;
pub mod results;
pub mod verify;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build all API routes with the shared application state
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/email", get(verify::verify_single_handler))
        .route("/email/batch-async", post(batch::batch_async_handler))
        .route("/email/stream-batch", post(batch::stream_batch_handler))
        .route("/email/process-from-db", post(batch::process_from_db_handler))
        .route(
            "/email/validation-results/by-category",
            get(results::by_category_handler),
        )
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .with_state(state)
}
