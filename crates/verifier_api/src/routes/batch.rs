//! Batch verification endpoints
//!
//! All three endpoints go through the verdict cache, so a batch that
//! repeats an address (or repeats a recent request) costs one probe.
//! Per-item problems never fail a whole batch; the affected address
//! gets an `Error`-category verdict instead.

use crate::api_handler::{error_verdict, ApiError, MessageResponse};
use crate::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use verifier_core::Verdict;

/// POST /email/batch-async
///
/// Verifies a JSON array of addresses concurrently and returns the
/// verdicts in input order.
#[instrument(skip(state, emails))]
pub async fn batch_async_handler(
    State(state): State<Arc<AppState>>,
    Json(emails): Json<Vec<String>>,
) -> Result<Json<Vec<Verdict>>, ApiError> {
    if emails.is_empty() {
        return Err(ApiError::BadRequest(
            "Email list must not be empty.".to_string(),
        ));
    }

    info!("Processing batch of {} addresses", emails.len());
    let verdicts =
        futures::future::join_all(emails.iter().map(|email| state.cache.fetch(email))).await;

    Ok(Json(verdicts))
}

/// POST /email/stream-batch
///
/// Server-sent event stream of verdicts, one event per address, in
/// input order.
#[instrument(skip(state, emails))]
pub async fn stream_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(emails): Json<Vec<String>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if emails.is_empty() {
        return Err(ApiError::BadRequest(
            "Email list must not be empty.".to_string(),
        ));
    }

    info!("Streaming batch of {} addresses", emails.len());
    let stream = futures::stream::iter(emails).then(move |email| {
        let state = state.clone();
        async move {
            let verdict = state.cache.fetch(&email).await;
            let event = Event::default().json_data(&verdict).unwrap_or_else(|err| {
                warn!("Failed to serialize verdict for {}: {}", email, err);
                Event::default()
                    .json_data(&error_verdict(&email, &err.to_string()))
                    .unwrap_or_else(|_| Event::default().data("{}"))
            });
            Ok::<_, Infallible>(event)
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /email/process-from-db
///
/// Verifies every address in the primary store and returns the
/// verdicts. Addresses are processed sequentially; a large table means
/// a long request.
#[instrument(skip(state))]
pub async fn process_from_db_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let addresses = state.registry.all_addresses().await?;
    if addresses.is_empty() {
        return Ok(Json(MessageResponse::new("No emails found to process.")).into_response());
    }

    info!("Processing {} addresses from the primary store", addresses.len());
    let mut verdicts = Vec::with_capacity(addresses.len());
    for address in &addresses {
        verdicts.push(state.cache.fetch(address).await);
    }

    Ok(Json(verdicts).into_response())
}
