use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use crate::db::{MovieStore, ProcessingQueueStore};
use crate::error::AppResult;
use crate::models::{NewQueueEntry, NewRecommendation, TriggerSource};
use crate::queue::EnrichmentRequest;
use crate::services::generation::{parse_candidates, Candidate, RecommendationGenerator};
use crate::services::recommendation_cache::RecommendationCache;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    pub stored: usize,
    pub unresolved: usize,
}

/// Background job upgrading a partial answer to a complete one
pub struct Enricher {
    movies: Arc<dyn MovieStore>,
    generator: Arc<dyn RecommendationGenerator>,
    cache: RecommendationCache,
    ingestion: Arc<dyn ProcessingQueueStore>,
}

impl Enricher {
    pub fn new(
        movies: Arc<dyn MovieStore>,
        generator: Arc<dyn RecommendationGenerator>,
        cache: RecommendationCache,
        ingestion: Arc<dyn ProcessingQueueStore>,
    ) -> Self {
        Self {
            movies,
            generator,
            cache,
            ingestion,
        }
    }

    /// Generates, resolves and stores recommendations for one fingerprint.
    ///
    /// Generation and persistence errors are returned so the worker can retry
    /// the whole job; the final write is keyed by fingerprint and safe to repeat.
    pub async fn run(&self, request: &EnrichmentRequest) -> AppResult<EnrichmentOutcome> {
        let Some(source) = self.movies.get_movie(request.source_movie_id).await? else {
            tracing::warn!(
                movie_id = request.source_movie_id,
                "Source movie vanished before enrichment"
            );
            return Ok(EnrichmentOutcome::default());
        };

        let raw = self.generator.generate(&source, &request.keywords).await?;
        let candidates = parse_candidates(&raw);

        tracing::info!(
            movie_id = source.id,
            fingerprint = %request.fingerprint,
            generator = self.generator.name(),
            candidates = candidates.len(),
            "Generation finished"
        );

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();

        for candidate in candidates {
            // A candidate without a year cannot be matched exactly
            let found = match candidate.year {
                Some(year) => self.movies.find_by_title_year(&candidate.title, year).await?,
                None => None,
            };
            match found {
                Some(movie) if movie.id == source.id => {}
                Some(movie) => {
                    if seen.insert(movie.id) {
                        resolved.push(NewRecommendation {
                            source_movie_id: source.id,
                            recommended_movie_id: movie.id,
                            justification: candidate.justification,
                            llm_score: candidate.score,
                        });
                    }
                }
                None => {
                    tracing::debug!(
                        title = %candidate.title,
                        year = ?candidate.year,
                        "Candidate not in catalog"
                    );
                    unresolved.push(candidate);
                }
            }
        }

        let outcome = EnrichmentOutcome {
            stored: resolved.len(),
            unresolved: unresolved.len(),
        };

        self.queue_for_ingestion(source.id, &unresolved).await;

        if resolved.is_empty() {
            // The marker stays until it expires so the same request does not
            // immediately trigger another empty generation
            tracing::warn!(
                movie_id = source.id,
                fingerprint = %request.fingerprint,
                "No candidates resolved to known movies"
            );
            return Ok(outcome);
        }

        let results = self.cache.store(&request.fingerprint, &resolved).await?;
        if results.is_empty() {
            // Nothing displayable was cached, so a cleared marker would let
            // every following request generate again
            tracing::warn!(
                movie_id = source.id,
                fingerprint = %request.fingerprint,
                stored = outcome.stored,
                "No resolved recommendation is displayable"
            );
            return Ok(outcome);
        }
        self.cache.clear_marker(&request.fingerprint).await;

        tracing::info!(
            movie_id = source.id,
            fingerprint = %request.fingerprint,
            stored = outcome.stored,
            displayable = results.len(),
            unresolved = outcome.unresolved,
            "Recommendations enriched"
        );

        Ok(outcome)
    }

    async fn queue_for_ingestion(&self, source_movie_id: i64, candidates: &[Candidate]) {
        if candidates.is_empty() {
            return;
        }

        let entries: Vec<NewQueueEntry> = candidates
            .iter()
            .map(|c| NewQueueEntry {
                source_movie_id: Some(source_movie_id),
                title: c.title.trim().to_string(),
                release_year: c.year,
                properties: json!({
                    "justification": c.justification,
                    "ai_score": c.score,
                }),
                trigger_source: TriggerSource::Recommendation,
            })
            .collect();

        if let Err(e) = self.ingestion.enqueue_if_absent(&entries).await {
            tracing::warn!(
                movie_id = source_movie_id,
                count = entries.len(),
                error = %e,
                "Failed to queue unknown titles for ingestion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{
        InMemoryMovieStore, InMemoryProcessingQueue, InMemoryRecommendationStore, InMemoryStore,
    };
    use crate::error::AppError;
    use crate::models::movie::sample_movie;
    use crate::services::fingerprint::Fingerprint;
    use crate::services::generation::MockRecommendationGenerator;
    use crate::services::recommendation_cache::CacheTier;

    const LLM_OUTPUT: &str = r#"```json
{"movies": [
  {"title": "Heat", "year": 2010, "justification": ["crew", "heist"], "ai_score": 8.5},
  {"title": "inception", "year": 2010, "justification": ["itself"], "ai_score": 9.9},
  {"title": "Rififi", "year": 1955, "justification": ["silent heist"], "ai_score": 7.0},
  {"title": "HEAT", "year": 2010, "justification": ["duplicate"], "ai_score": 1.0}
]}
```"#;

    struct Fixture {
        movies: Arc<InMemoryMovieStore>,
        cache: RecommendationCache,
        hot: Arc<InMemoryStore>,
        ingestion: Arc<InMemoryProcessingQueue>,
    }

    fn fixture() -> Fixture {
        let movies = Arc::new(InMemoryMovieStore::new());
        movies.insert(sample_movie(42, "Inception", &["heist", "dreams"]));
        movies.insert(sample_movie(7, "Heat", &["heist"]));

        let hot = Arc::new(InMemoryStore::new());
        let durable = Arc::new(InMemoryRecommendationStore::new(movies.clone()));
        let cache = RecommendationCache::new(hot.clone(), durable, 3600, 600);

        Fixture {
            movies,
            cache,
            hot,
            ingestion: Arc::new(InMemoryProcessingQueue::new()),
        }
    }

    fn enricher(f: &Fixture, generator: MockRecommendationGenerator) -> Enricher {
        Enricher::new(
            f.movies.clone(),
            Arc::new(generator),
            f.cache.clone(),
            f.ingestion.clone(),
        )
    }

    fn request() -> EnrichmentRequest {
        EnrichmentRequest {
            source_movie_id: 42,
            keywords: vec!["heist".to_string()],
            fingerprint: Fingerprint::new(42, &["heist"]),
        }
    }

    fn generator_returning(output: &'static str) -> MockRecommendationGenerator {
        let mut generator = MockRecommendationGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(move |_, _| Ok(output.to_string()));
        generator.expect_name().return_const("mock");
        generator
    }

    #[tokio::test]
    async fn test_resolved_candidates_stored_and_cached() {
        let f = fixture();
        let enricher = enricher(&f, generator_returning(LLM_OUTPUT));
        let req = request();
        assert!(f.cache.try_mark_generating(&req.fingerprint).await);

        let outcome = enricher.run(&req).await.unwrap();
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.unresolved, 1);

        let (results, tier) = f.cache.get(&req.fingerprint).await.unwrap().unwrap();
        assert_eq!(tier, CacheTier::Hot);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 7);
        assert_eq!(results[0].justification, vec!["crew", "heist"]);
        assert_eq!(results[0].score, 8.5);

        // Marker released once results are cached
        assert!(f.cache.try_mark_generating(&req.fingerprint).await);
    }

    #[tokio::test]
    async fn test_unresolved_titles_queued_for_ingestion() {
        let f = fixture();
        let enricher = enricher(&f, generator_returning(LLM_OUTPUT));

        enricher.run(&request()).await.unwrap();

        let entries = f.ingestion.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Rififi");
        assert_eq!(entries[0].release_year, Some(1955));
        assert_eq!(entries[0].source_movie_id, Some(42));
        assert_eq!(entries[0].trigger_source, TriggerSource::Recommendation);
    }

    #[tokio::test]
    async fn test_unparseable_output_leaves_marker() {
        let f = fixture();
        let enricher = enricher(&f, generator_returning("I cannot help with that."));
        let req = request();
        assert!(f.cache.try_mark_generating(&req.fingerprint).await);

        let outcome = enricher.run(&req).await.unwrap();
        assert_eq!(outcome, EnrichmentOutcome::default());
        assert!(f.cache.get(&req.fingerprint).await.unwrap().is_none());
        assert!(!f.cache.try_mark_generating(&req.fingerprint).await);
    }

    #[tokio::test]
    async fn test_generator_failure_propagates() {
        let f = fixture();
        let mut generator = MockRecommendationGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Err(AppError::UpstreamUnavailable("timeout".to_string())));
        generator.expect_name().return_const("mock");
        let enricher = enricher(&f, generator);

        let result = enricher.run(&request()).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_source_skips_generation() {
        let f = fixture();
        let mut generator = MockRecommendationGenerator::new();
        generator.expect_generate().never();
        let enricher = enricher(&f, generator);

        let outcome = enricher
            .run(&EnrichmentRequest {
                source_movie_id: 999,
                keywords: vec!["heist".to_string()],
                fingerprint: Fingerprint::new(999, &["heist"]),
            })
            .await
            .unwrap();
        assert_eq!(outcome, EnrichmentOutcome::default());
    }

    #[tokio::test]
    async fn test_undisplayable_results_keep_marker() {
        let f = fixture();
        let mut heat = sample_movie(7, "Heat", &["heist"]);
        heat.poster_path = None;
        f.movies.insert(heat);
        let enricher = enricher(&f, generator_returning(LLM_OUTPUT));
        let req = request();

        // Each pass mirrors one request: miss, claim the marker, enrich
        let mut dispatches = 0;
        for _ in 0..3 {
            assert!(f.cache.get(&req.fingerprint).await.unwrap().is_none());
            if f.cache.try_mark_generating(&req.fingerprint).await {
                dispatches += 1;
                let outcome = enricher.run(&req).await.unwrap();
                assert_eq!(outcome.stored, 1);
            }
        }

        assert_eq!(dispatches, 1);
    }

    #[tokio::test]
    async fn test_yearless_candidate_not_resolved() {
        let f = fixture();
        let enricher = enricher(
            &f,
            generator_returning(
                "```json\n{\"movies\": [{\"title\": \"Heat\", \"ai_score\": 8.0}]}\n```",
            ),
        );
        let req = request();
        assert!(f.cache.try_mark_generating(&req.fingerprint).await);

        let outcome = enricher.run(&req).await.unwrap();
        assert_eq!(outcome, EnrichmentOutcome { stored: 0, unresolved: 1 });
        assert!(f.cache.get(&req.fingerprint).await.unwrap().is_none());

        let entries = f.ingestion.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Heat");
        assert_eq!(entries[0].release_year, None);
    }

    #[tokio::test]
    async fn test_rerun_overwrites_same_fingerprint() {
        let f = fixture();
        let mut generator = MockRecommendationGenerator::new();
        generator
            .expect_generate()
            .times(2)
            .returning(|_, _| Ok(LLM_OUTPUT.to_string()));
        generator.expect_name().return_const("mock");
        let enricher = enricher(&f, generator);

        enricher.run(&request()).await.unwrap();
        f.hot.set_available(false);
        enricher.run(&request()).await.ok();
        f.hot.set_available(true);

        let (results, _) = f.cache.get(&request().fingerprint).await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
    }
}
