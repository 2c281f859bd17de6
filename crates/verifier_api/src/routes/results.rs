//! Cached verdict queries

use crate::api_handler::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use verifier_core::Verdict;

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

/// GET /email/validation-results/by-category?category=Valid
///
/// Returns the cached verdicts whose category matches,
/// case-insensitively. Unknown labels simply match nothing.
#[instrument(skip(state, query))]
pub async fn by_category_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Vec<Verdict>> {
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .ok_or_else(|| ApiError::BadRequest("category parameter must not be blank".to_string()))?;

    let verdicts = state.cache.all_by_category(category).await?;
    info!(
        "Found {} cached verdict(s) with category {}",
        verdicts.len(),
        category
    );

    Ok(Json(verdicts))
}
