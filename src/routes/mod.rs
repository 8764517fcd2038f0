use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::db::{KeyValueStore, MovieStore, SimilarityGraphStore};
use crate::middleware::{make_span_with_request_id, request_id_middleware};
use crate::services::{RecommendationOrchestrator, VoteService};

pub mod movies;
pub mod recommendations;
pub mod votes;

/// Shared handler state; every component is behind an `Arc`
#[derive(Clone)]
pub struct AppState {
    pub movies: Arc<dyn MovieStore>,
    pub graph: Arc<dyn SimilarityGraphStore>,
    pub cache: Arc<dyn KeyValueStore>,
    pub recommendations: Arc<RecommendationOrchestrator>,
    pub votes: Arc<VoteService>,
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            // Request id is assigned before the trace span is created
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/movies/search", get(movies::search))
        .route("/movies/trending", get(movies::trending))
        .route("/movies/:id", get(movies::get_movie))
        .route("/movies/:id/similar", get(movies::similar))
        .route("/recommendations", post(recommendations::recommend))
        .route("/votes", post(votes::create_vote))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
