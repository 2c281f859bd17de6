//! Single-address verification
//!
//! `GET /email?email=...` serves from the verdict cache, probing on a
//! miss. Missing, blank, or syntactically invalid addresses are a 400;
//! everything else produces a verdict, whatever the probe found.

use crate::api_handler::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use verifier_core::{EmailVerifier, Verdict};

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

/// GET /email?email=user@example.com
#[instrument(skip(state, query), fields(request_id))]
pub async fn verify_single_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Verdict> {
    let request_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", &request_id);

    let email = query
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ApiError::BadRequest("email parameter must not be blank".to_string()))?;

    if !EmailVerifier::is_valid_syntax(email) {
        return Err(ApiError::BadRequest(format!(
            "not a valid email address: {email}"
        )));
    }

    info!("Verifying email: {}", email);
    let verdict = state.cache.fetch(email).await;
    info!("Email {} categorized as {}", email, verdict.category);

    Ok(Json(verdict))
}
