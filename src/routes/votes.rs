use axum::{extract::State, http::StatusCode, Extension, Json};

use super::AppState;
use crate::error::AppResult;
use crate::middleware::RequestId;
use crate::models::{VoteRequest, VoteResponse};

/// Accepts a vote for background processing
pub async fn create_vote(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(vote): Json<VoteRequest>,
) -> AppResult<(StatusCode, Json<VoteResponse>)> {
    let response = state
        .votes
        .submit(vote, Some(request_id.into_inner()))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
