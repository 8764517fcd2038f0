use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::cached;
use crate::db::CacheKey;
use crate::error::{AppError, AppResult};
use crate::models::{Movie, ScoreKind, SimilarEdge, TrendingPage};

const MIN_QUERY_LEN: usize = 3;
const SEARCH_LIMIT: usize = 20;
const SEARCH_TTL_SECS: u64 = 3600;
const DEFAULT_SIMILAR_LIMIT: usize = 20;
const MAX_SIMILAR_LIMIT: usize = 100;
const TRENDING_PAGE_SIZE: usize = 20;
const TRENDING_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SimilarQuery {
    #[serde(default)]
    order: ScoreKind,
    limit: Option<usize>,
}

/// Catalog movie plus the scores of its edge to the queried movie
#[derive(Debug, Serialize)]
pub struct SimilarMovie {
    #[serde(flatten)]
    pub movie: Movie,
    pub ai_score: Option<f64>,
    pub similarity_score: Option<f64>,
    pub user_votes: u64,
    pub effective_score: f64,
}

impl SimilarMovie {
    fn new(movie: Movie, edge: &SimilarEdge) -> Self {
        Self {
            movie,
            ai_score: edge.ai_score,
            similarity_score: edge.similarity_score,
            user_votes: edge.user_votes,
            effective_score: edge.effective_score,
        }
    }
}

/// Title search, cached for an hour per normalized query
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<Vec<Movie>>> {
    let query = params.q.trim().to_string();
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(AppError::InvalidInput(format!(
            "Search query must be at least {} characters",
            MIN_QUERY_LEN
        )));
    }

    let movies: Vec<Movie> = cached!(
        state.cache,
        CacheKey::MovieSearch(query.clone()),
        SEARCH_TTL_SECS,
        state.movies.search_by_title(&query, SEARCH_LIMIT)
    )?;

    Ok(Json(movies))
}

/// One page of the trending list, cached for a day per page
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingQuery>,
) -> AppResult<Json<TrendingPage>> {
    let page = params.page.unwrap_or(1).max(1);

    let trending: TrendingPage = cached!(
        state.cache,
        CacheKey::Trending(page),
        TRENDING_TTL_SECS,
        state.movies.trending(page, TRENDING_PAGE_SIZE)
    )?;

    Ok(Json(trending))
}

pub async fn get_movie(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Movie>> {
    let movie = state
        .movies
        .get_movie(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", id)))?;
    Ok(Json(movie))
}

/// Graph neighbours of a movie, in the order the graph ranks them
pub async fn similar(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<SimilarQuery>,
) -> AppResult<Json<Vec<SimilarMovie>>> {
    if state.movies.get_movie(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Movie {} not found", id)));
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_SIMILAR_LIMIT)
        .clamp(1, MAX_SIMILAR_LIMIT);
    let edges = state.graph.get_top_similar(id, limit, params.order).await?;

    let ids: Vec<i64> = edges.iter().map(|e| e.target_id).collect();
    let mut movies: HashMap<i64, Movie> = state
        .movies
        .get_movies(&ids)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let similar = edges
        .iter()
        .filter_map(|edge| {
            let movie = movies.remove(&edge.target_id)?;
            Some(SimilarMovie::new(movie, edge))
        })
        .collect();

    Ok(Json(similar))
}
