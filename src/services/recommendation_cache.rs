//! Two-tier cache of enriched recommendation lists.
//!
//! Tier one is the expiring key-value store, tier two the persisted LLM
//! recommendations. Both are keyed by the request fingerprint. A per-fingerprint
//! marker records that an enrichment job has been dispatched.

use std::sync::Arc;

use crate::db::{CacheKey, KeyValueStore, RecommendationStore};
use crate::error::{AppError, AppResult};
use crate::models::{NewRecommendation, RecommendationResult};
use crate::services::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Hot,
    Durable,
}

#[derive(Clone)]
pub struct RecommendationCache {
    hot: Arc<dyn KeyValueStore>,
    durable: Arc<dyn RecommendationStore>,
    ttl_secs: u64,
    marker_ttl_secs: u64,
}

impl RecommendationCache {
    pub fn new(
        hot: Arc<dyn KeyValueStore>,
        durable: Arc<dyn RecommendationStore>,
        ttl_secs: u64,
        marker_ttl_secs: u64,
    ) -> Self {
        Self {
            hot,
            durable,
            ttl_secs,
            marker_ttl_secs,
        }
    }

    /// Looks up tier one, then tier two. A tier-two hit is copied back into
    /// tier one in the background.
    ///
    /// A failing hot tier is logged and skipped; a failing durable tier is an
    /// error.
    pub async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> AppResult<Option<(Vec<RecommendationResult>, CacheTier)>> {
        let key = CacheKey::LlmRecommendations(fingerprint.clone());

        match self.hot.get_from_cache::<Vec<RecommendationResult>>(&key).await {
            Ok(Some(results)) if !results.is_empty() => {
                tracing::debug!(fingerprint = %fingerprint, "Hot cache hit");
                return Ok(Some((results, CacheTier::Hot)));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Hot cache read failed");
            }
        }

        let results = self.load_durable(fingerprint).await?;
        if results.is_empty() {
            return Ok(None);
        }

        tracing::debug!(
            fingerprint = %fingerprint,
            count = results.len(),
            "Durable cache hit, repopulating hot cache"
        );
        self.hot.set_json_in_background(&key, &results, self.ttl_secs);

        Ok(Some((results, CacheTier::Durable)))
    }

    /// Writes a result list into tier one
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        results: &[RecommendationResult],
        ttl_secs: u64,
    ) -> AppResult<()> {
        let json = serde_json::to_string(results)
            .map_err(|e| AppError::Internal(format!("Cache serialization error: {}", e)))?;
        self.hot
            .set_ex(&CacheKey::LlmRecommendations(fingerprint.clone()), json, ttl_secs)
            .await
    }

    /// Persists freshly generated recommendations into tier two, then writes
    /// the resulting list into tier one. Returns the displayable results.
    pub async fn store(
        &self,
        fingerprint: &Fingerprint,
        recommendations: &[NewRecommendation],
    ) -> AppResult<Vec<RecommendationResult>> {
        self.durable.bulk_create(fingerprint, recommendations).await?;

        let results = self.load_durable(fingerprint).await?;
        if !results.is_empty() {
            self.put(fingerprint, &results, self.ttl_secs).await?;
        }

        Ok(results)
    }

    async fn load_durable(&self, fingerprint: &Fingerprint) -> AppResult<Vec<RecommendationResult>> {
        Ok(self
            .durable
            .find_by_fingerprint(fingerprint)
            .await?
            .iter()
            .filter(|(_, movie)| movie.is_displayable())
            .map(|(rec, movie)| RecommendationResult::from_recommendation(movie, rec))
            .collect())
    }

    /// Claims the right to dispatch enrichment for `fingerprint`.
    ///
    /// Returns true for the first caller while the marker lives. If the marker
    /// store cannot be reached the caller is allowed to dispatch; duplicate
    /// jobs converge on the same fingerprint-keyed write.
    pub async fn try_mark_generating(&self, fingerprint: &Fingerprint) -> bool {
        let key = CacheKey::GenerationMarker(fingerprint.clone());
        match self
            .hot
            .set_nx_ex(&key, "1".to_string(), self.marker_ttl_secs)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Generation marker unavailable, dispatching anyway"
                );
                true
            }
        }
    }

    pub async fn clear_marker(&self, fingerprint: &Fingerprint) {
        let key = CacheKey::GenerationMarker(fingerprint.clone());
        if let Err(e) = self.hot.delete(&key).await {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "Failed to clear generation marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{InMemoryMovieStore, InMemoryRecommendationStore, InMemoryStore};
    use crate::models::movie::sample_movie;

    struct Fixture {
        cache: RecommendationCache,
        hot: Arc<InMemoryStore>,
        durable: Arc<InMemoryRecommendationStore>,
        movies: Arc<InMemoryMovieStore>,
    }

    fn fixture() -> Fixture {
        let hot = Arc::new(InMemoryStore::new());
        let movies = Arc::new(InMemoryMovieStore::new());
        let durable = Arc::new(InMemoryRecommendationStore::new(movies.clone()));
        let cache = RecommendationCache::new(hot.clone(), durable.clone(), 3600, 600);
        Fixture {
            cache,
            hot,
            durable,
            movies,
        }
    }

    fn new_rec(recommended: i64, score: f64) -> NewRecommendation {
        NewRecommendation {
            source_movie_id: 42,
            recommended_movie_id: recommended,
            justification: vec!["shared heist plot".to_string()],
            llm_score: Some(score),
        }
    }

    #[tokio::test]
    async fn test_cold_cache_misses() {
        let f = fixture();
        let fp = Fingerprint::new(42, &["heist"]);
        assert!(f.cache.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_then_hot_hit() {
        let f = fixture();
        f.movies.insert(sample_movie(7, "Heat", &[]));
        f.movies.insert(sample_movie(8, "Thief", &[]));
        let fp = Fingerprint::new(42, &["heist"]);

        let stored = f
            .cache
            .store(&fp, &[new_rec(7, 6.0), new_rec(8, 9.0)])
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, 8);

        let (results, tier) = f.cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Hot);
        assert_eq!(results, stored);
    }

    #[tokio::test]
    async fn test_durable_hit_repopulates_hot_tier() {
        let f = fixture();
        f.movies.insert(sample_movie(7, "Heat", &[]));
        let fp = Fingerprint::new(42, &["heist"]);
        f.durable.bulk_create(&fp, &[new_rec(7, 8.0)]).await.unwrap();

        let (_, tier) = f.cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Durable);

        let (_, tier) = f.cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Hot);
    }

    #[tokio::test]
    async fn test_hot_outage_falls_through_to_durable() {
        let f = fixture();
        f.movies.insert(sample_movie(7, "Heat", &[]));
        let fp = Fingerprint::new(42, &["heist"]);
        f.durable.bulk_create(&fp, &[new_rec(7, 8.0)]).await.unwrap();
        f.hot.set_available(false);

        let (results, tier) = f.cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Durable);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_undisplayable_movies_dropped() {
        let f = fixture();
        let mut no_poster = sample_movie(7, "Heat", &[]);
        no_poster.poster_path = None;
        f.movies.insert(no_poster);
        let fp = Fingerprint::new(42, &["heist"]);

        let stored = f.cache.store(&fp, &[new_rec(7, 8.0)]).await.unwrap();
        assert!(stored.is_empty());
        assert!(f.cache.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_marker_acquired_once_until_cleared() {
        let f = fixture();
        let fp = Fingerprint::new(42, &["heist"]);

        assert!(f.cache.try_mark_generating(&fp).await);
        assert!(!f.cache.try_mark_generating(&fp).await);

        f.cache.clear_marker(&fp).await;
        assert!(f.cache.try_mark_generating(&fp).await);
    }

    #[tokio::test]
    async fn test_marker_outage_allows_dispatch() {
        let f = fixture();
        f.hot.set_available(false);
        let fp = Fingerprint::new(42, &["heist"]);
        assert!(f.cache.try_mark_generating(&fp).await);
        assert!(f.cache.try_mark_generating(&fp).await);
    }
}
