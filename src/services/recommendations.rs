use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::db::{MovieStore, SimilarityGraphStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Movie, RecommendationRequest, RecommendationResponse, RecommendationResult,
    RecommendationStatus, ScoreKind,
};
use crate::queue::{EnrichmentRequest, Job, JobEnvelope, TaskQueue};
use crate::retry::{retry, RetryPolicy};
use crate::services::fingerprint::{normalize_keyword, Fingerprint};
use crate::services::recommendation_cache::RecommendationCache;

/// Serves recommendation queries.
///
/// Request path is read-only: cache tiers first, then a cheap graph ranking.
/// Misses dispatch one enrichment job per fingerprint and answer `partial`
/// without waiting for it.
pub struct RecommendationOrchestrator {
    movies: Arc<dyn MovieStore>,
    graph: Arc<dyn SimilarityGraphStore>,
    cache: RecommendationCache,
    queue: Arc<dyn TaskQueue>,
    fallback_limit: usize,
}

impl RecommendationOrchestrator {
    pub fn new(
        movies: Arc<dyn MovieStore>,
        graph: Arc<dyn SimilarityGraphStore>,
        cache: RecommendationCache,
        queue: Arc<dyn TaskQueue>,
        fallback_limit: usize,
    ) -> Self {
        Self {
            movies,
            graph,
            cache,
            queue,
            fallback_limit,
        }
    }

    pub async fn recommend(
        &self,
        request: RecommendationRequest,
        request_id: Option<String>,
    ) -> AppResult<RecommendationResponse> {
        let source = self
            .movies
            .get_movie(request.source_movie_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Movie {} not found", request.source_movie_id))
            })?;

        let keywords = select_keywords(&source, &request.selected_keywords)?;

        if keywords.is_empty() {
            let results = self.fallback(&source, &source.keyword_set()).await;
            return Ok(partial(results));
        }

        let fingerprint = Fingerprint::new(source.id, &keywords);

        match self.cache.get(&fingerprint).await {
            Ok(Some((results, tier))) => {
                tracing::info!(
                    movie_id = source.id,
                    fingerprint = %fingerprint,
                    tier = ?tier,
                    count = results.len(),
                    "Serving cached recommendations"
                );
                return Ok(RecommendationResponse {
                    status: RecommendationStatus::Complete,
                    results,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Recommendation cache lookup failed");
            }
        }

        let selected: BTreeSet<String> = keywords.iter().map(|k| normalize_keyword(k)).collect();
        let results = self.fallback(&source, &selected).await;

        self.dispatch_enrichment(&source, keywords, fingerprint, request_id)
            .await;

        Ok(partial(results))
    }

    /// Graph-ranked neighbours with displayable metadata.
    ///
    /// Degrades to an empty list when the graph or catalog cannot be read.
    async fn fallback(&self, source: &Movie, keywords: &BTreeSet<String>) -> Vec<RecommendationResult> {
        let edges = match retry(RetryPolicy::inline_read(), "graph_fallback", || {
            self.graph
                .get_top_similar(source.id, self.fallback_limit, ScoreKind::Effective)
        })
        .await
        {
            Ok(edges) => edges,
            Err(e) => {
                tracing::warn!(movie_id = source.id, error = %e, "Fallback ranking unavailable");
                return vec![];
            }
        };

        let ids: Vec<i64> = edges.iter().map(|e| e.target_id).collect();
        let movies: HashMap<i64, Movie> = match self.movies.get_movies(&ids).await {
            Ok(movies) => movies.into_iter().map(|m| (m.id, m)).collect(),
            Err(e) => {
                tracing::warn!(movie_id = source.id, error = %e, "Fallback metadata unavailable");
                return vec![];
            }
        };

        let results: Vec<RecommendationResult> = edges
            .iter()
            .filter_map(|edge| {
                let movie = movies.get(&edge.target_id)?;
                if !movie.is_displayable() {
                    return None;
                }
                let shared: Vec<String> = movie
                    .keyword_set()
                    .intersection(keywords)
                    .cloned()
                    .collect();
                Some(RecommendationResult::from_edge(movie, edge, shared))
            })
            .collect();

        tracing::debug!(
            movie_id = source.id,
            neighbours = edges.len(),
            results = results.len(),
            "Fallback ranking computed"
        );

        results
    }

    async fn dispatch_enrichment(
        &self,
        source: &Movie,
        keywords: Vec<String>,
        fingerprint: Fingerprint,
        request_id: Option<String>,
    ) {
        if !self.cache.try_mark_generating(&fingerprint).await {
            tracing::debug!(fingerprint = %fingerprint, "Enrichment already dispatched");
            return;
        }

        let job = Job::GenerateRecommendations(EnrichmentRequest {
            source_movie_id: source.id,
            keywords,
            fingerprint: fingerprint.clone(),
        });

        match self.queue.enqueue(JobEnvelope::new(job, request_id)).await {
            Ok(()) => {
                tracing::info!(movie_id = source.id, fingerprint = %fingerprint, "Enrichment dispatched")
            }
            Err(e) => {
                // Let the next request try again
                tracing::error!(fingerprint = %fingerprint, error = %e, "Failed to dispatch enrichment");
                self.cache.clear_marker(&fingerprint).await;
            }
        }
    }
}

fn partial(results: Vec<RecommendationResult>) -> RecommendationResponse {
    RecommendationResponse {
        status: RecommendationStatus::Partial,
        results,
    }
}

/// Validates the selection against the source movie's keywords.
///
/// Returns the movie's own spelling of each selected keyword, de-duplicated
/// and ordered by normalized form.
fn select_keywords(source: &Movie, selected: &[String]) -> AppResult<Vec<String>> {
    let known: BTreeMap<String, &String> = source
        .ai_keywords
        .iter()
        .map(|k| (normalize_keyword(k), k))
        .collect();

    let mut chosen: BTreeMap<String, String> = BTreeMap::new();
    for keyword in selected {
        let normalized = normalize_keyword(keyword);
        match known.get(&normalized) {
            Some(original) if !normalized.is_empty() => {
                chosen.insert(normalized, (*original).clone());
            }
            _ => {
                return Err(AppError::InvalidInput(format!(
                    "Keyword '{}' is not associated with movie {}",
                    keyword, source.id
                )));
            }
        }
    }

    Ok(chosen.into_values().collect())
}
