use axum::{extract::State, Extension, Json};

use super::AppState;
use crate::error::AppResult;
use crate::middleware::RequestId;
use crate::models::{RecommendationRequest, RecommendationResponse};

/// Handler for recommendations endpoint
pub async fn recommend(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationResponse>> {
    let response = state
        .recommendations
        .recommend(request, Some(request_id.into_inner()))
        .await?;
    Ok(Json(response))
}
