//! In-process implementations of the storage traits.
//!
//! Used by the test suites and for running the API without Postgres or Redis.
//! Expiry follows `tokio::time`, so tests can move a paused clock past a TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use super::cache::KeyValueStore;
use super::graph::{EdgeScores, SimilarityGraphStore};
use super::movies::MovieStore;
use super::processing_queue::ProcessingQueueStore;
use super::recommendations::RecommendationStore;
use super::votes_log::{VoteLogEntry, VoteLogStore};
use super::CacheKey;
use crate::error::{AppError, AppResult};
use crate::models::{
    CanonicalPair, LlmRecommendation, Movie, NewQueueEntry, NewRecommendation, ScoreKind,
    SimilarEdge, TrendingPage,
};
use crate::services::fingerprint::{normalize_keyword, Fingerprint};
use crate::services::scoring::ScoreWeights;

fn unavailable(what: &str) -> AppError {
    AppError::UpstreamUnavailable(format!("{} is unavailable", what))
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: String, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Key-value store with expiring keys
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// When false, every operation fails as if the server were unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("key-value store"))
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        self.check()?;
        Ok(self
            .entries
            .get(&key.to_string())
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()> {
        self.check()?;
        self.entries.insert(key.to_string(), Entry::new(value, ttl_secs));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<bool> {
        self.check()?;
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: String::new(),
            expires_at: Instant::now(),
        });
        if slot.is_live() {
            return Ok(false);
        }
        *slot = Entry::new(value, ttl_secs);
        Ok(true)
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        self.check()?;
        Ok(self
            .entries
            .get(&key.to_string())
            .is_some_and(|entry| entry.is_live()))
    }

    async fn delete(&self, key: &CacheKey) -> AppResult<()> {
        self.check()?;
        self.entries.remove(&key.to_string());
        Ok(())
    }

    async fn incr_window(&self, key: &CacheKey, window_secs: u64) -> AppResult<u64> {
        self.check()?;
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".to_string(), window_secs));
        if !slot.is_live() {
            *slot = Entry::new("0".to_string(), window_secs);
        }
        let count = slot.value.parse::<u64>().unwrap_or(0) + 1;
        slot.value = count.to_string();
        Ok(count)
    }

    async fn decr_window(&self, key: &CacheKey) -> AppResult<()> {
        self.check()?;
        if let Some(mut slot) = self.entries.get_mut(&key.to_string()) {
            if slot.is_live() {
                let count = slot.value.parse::<u64>().unwrap_or(0).saturating_sub(1);
                slot.value = count.to_string();
            }
        }
        Ok(())
    }

    fn set_in_background(&self, key: &CacheKey, value: String, ttl_secs: u64) {
        if self.check().is_ok() {
            self.entries.insert(key.to_string(), Entry::new(value, ttl_secs));
        }
    }
}

/// Movie catalog
#[derive(Default)]
pub struct InMemoryMovieStore {
    movies: DashMap<i64, Movie>,
}

impl InMemoryMovieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, movie: Movie) {
        self.movies.insert(movie.id, movie);
    }
}

#[async_trait]
impl MovieStore for InMemoryMovieStore {
    async fn get_movie(&self, id: i64) -> AppResult<Option<Movie>> {
        Ok(self.movies.get(&id).map(|m| m.clone()))
    }

    async fn get_movies(&self, ids: &[i64]) -> AppResult<Vec<Movie>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.movies.get(id).map(|m| m.clone()))
            .collect())
    }

    async fn search_by_title(&self, query: &str, limit: usize) -> AppResult<Vec<Movie>> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<Movie> = self
            .movies
            .iter()
            .filter(|m| m.title.to_lowercase().contains(&needle))
            .map(|m| m.clone())
            .collect();

        // Exact titles first, then popularity
        matches.sort_by(|a, b| {
            let a_exact = a.title.to_lowercase() == needle;
            let b_exact = b.title.to_lowercase() == needle;
            b_exact
                .cmp(&a_exact)
                .then(b.popularity.total_cmp(&a.popularity))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn filter_new_ids(&self, ids: &[i64]) -> AppResult<HashSet<i64>> {
        Ok(ids
            .iter()
            .copied()
            .filter(|id| !self.movies.contains_key(id))
            .collect())
    }

    async fn find_by_title_year(&self, title: &str, year: i32) -> AppResult<Option<Movie>> {
        let normalized = normalize_keyword(title);
        if normalized.is_empty() {
            return Ok(None);
        }

        Ok(self
            .movies
            .iter()
            .filter(|m| normalize_keyword(&m.title) == normalized)
            .filter(|m| m.year() == Some(year))
            .max_by(|a, b| a.popularity.total_cmp(&b.popularity))
            .map(|m| m.clone()))
    }

    async fn trending(&self, page: u32, page_size: usize) -> AppResult<TrendingPage> {
        let page = page.max(1);
        let mut displayable: Vec<Movie> = self
            .movies
            .iter()
            .filter(|m| m.is_displayable())
            .map(|m| m.clone())
            .collect();
        displayable.sort_by(|a, b| b.popularity.total_cmp(&a.popularity).then(a.id.cmp(&b.id)));

        let total_pages = TrendingPage::page_count(displayable.len() as u64, page_size);
        let results = displayable
            .into_iter()
            .skip((page as usize - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(TrendingPage {
            page,
            results,
            total_pages,
        })
    }
}

/// Similarity graph keyed by canonical pair
pub struct InMemoryGraphStore {
    nodes: DashMap<i64, ()>,
    edges: DashMap<CanonicalPair, EdgeScores>,
    weights: ScoreWeights,
    failing_writes: AtomicUsize,
    available: AtomicBool,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl InMemoryGraphStore {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            nodes: DashMap::new(),
            edges: DashMap::new(),
            weights,
            failing_writes: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    pub fn add_movie(&self, movie_id: i64) {
        self.nodes.insert(movie_id, ());
    }

    /// Adds an offline-seeded edge (and its nodes) with no votes
    pub fn seed_edge(
        &self,
        pair: CanonicalPair,
        ai_score: Option<f64>,
        similarity_score: Option<f64>,
    ) {
        self.add_movie(pair.low());
        self.add_movie(pair.high());
        self.edges.insert(
            pair,
            EdgeScores {
                ai_score,
                similarity_score,
                user_votes: 0,
                effective_score: self.weights.effective_score(0, ai_score, similarity_score),
            },
        );
    }

    /// The next `count` vote upserts fail with a transient error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("graph store"))
        }
    }
}

#[async_trait]
impl SimilarityGraphStore for InMemoryGraphStore {
    async fn get_top_similar(
        &self,
        movie_id: i64,
        limit: usize,
        order: ScoreKind,
    ) -> AppResult<Vec<SimilarEdge>> {
        self.check()?;

        let mut neighbours: Vec<SimilarEdge> = self
            .edges
            .iter()
            .filter_map(|edge| {
                let target_id = edge.key().other(movie_id)?;
                let scores = edge.value();
                Some(SimilarEdge {
                    target_id,
                    ai_score: scores.ai_score,
                    similarity_score: scores.similarity_score,
                    user_votes: scores.user_votes,
                    effective_score: scores.effective_score,
                })
            })
            .collect();

        neighbours.sort_by(|a, b| match (a.score_for(order), b.score_for(order)) {
            (Some(x), Some(y)) => y.total_cmp(&x).then(a.target_id.cmp(&b.target_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.target_id.cmp(&b.target_id),
        });
        neighbours.truncate(limit);
        Ok(neighbours)
    }

    async fn upsert_vote(&self, pair: CanonicalPair) -> AppResult<bool> {
        self.check()?;

        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(unavailable("graph store"));
        }

        if !self.nodes.contains_key(&pair.low()) || !self.nodes.contains_key(&pair.high()) {
            return Ok(false);
        }

        // The entry guard holds the shard lock for the whole read-modify-write
        let mut edge = self.edges.entry(pair).or_insert(EdgeScores {
            ai_score: None,
            similarity_score: None,
            user_votes: 0,
            effective_score: 0.0,
        });
        edge.user_votes += 1;
        edge.effective_score =
            self.weights
                .effective_score(edge.user_votes, edge.ai_score, edge.similarity_score);

        Ok(true)
    }

    async fn get_edge(&self, pair: CanonicalPair) -> AppResult<Option<EdgeScores>> {
        self.check()?;
        Ok(self.edges.get(&pair).map(|e| e.clone()))
    }
}

/// Persisted LLM suggestions; joins against the given movie catalog
pub struct InMemoryRecommendationStore {
    movies: Arc<InMemoryMovieStore>,
    records: RwLock<Vec<LlmRecommendation>>,
    next_id: AtomicI64,
    available: AtomicBool,
}

impl InMemoryRecommendationStore {
    pub fn new(movies: Arc<InMemoryMovieStore>) -> Self {
        Self {
            movies,
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("recommendation store"))
        }
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> AppResult<Vec<(LlmRecommendation, Movie)>> {
        self.check()?;

        let mut matches: Vec<LlmRecommendation> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.trigger_fingerprint == fingerprint.as_str())
            .cloned()
            .collect();
        matches.sort_by(|a, b| match (a.llm_score, b.llm_score) {
            (Some(x), Some(y)) => y.total_cmp(&x).then(a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });

        let ids: Vec<i64> = matches.iter().map(|r| r.recommended_movie_id).collect();
        let movies: HashMap<i64, Movie> = self
            .movies
            .get_movies(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        Ok(matches
            .into_iter()
            .filter_map(|rec| {
                movies
                    .get(&rec.recommended_movie_id)
                    .cloned()
                    .map(|movie| (rec, movie))
            })
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<LlmRecommendation>> {
        self.check()?;
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_pair(&self, pair: CanonicalPair) -> AppResult<Option<LlmRecommendation>> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| {
                pair.other(r.source_movie_id) == Some(r.recommended_movie_id)
            })
            .max_by(|a, b| a.user_votes.cmp(&b.user_votes).then(b.id.cmp(&a.id)))
            .cloned())
    }

    async fn bulk_create(
        &self,
        fingerprint: &Fingerprint,
        recommendations: &[NewRecommendation],
    ) -> AppResult<Vec<LlmRecommendation>> {
        self.check()?;

        let mut records = self.records.write().await;
        let mut created = Vec::with_capacity(recommendations.len());

        for rec in recommendations {
            let existing = records.iter_mut().find(|r| {
                r.trigger_fingerprint == fingerprint.as_str()
                    && r.recommended_movie_id == rec.recommended_movie_id
            });

            let stored = match existing {
                Some(record) => {
                    record.llm_justification = rec.justification.clone();
                    record.llm_score = rec.llm_score;
                    record.clone()
                }
                None => {
                    let record = LlmRecommendation {
                        id: self.next_id.fetch_add(1, Ordering::SeqCst),
                        source_movie_id: rec.source_movie_id,
                        recommended_movie_id: rec.recommended_movie_id,
                        trigger_fingerprint: fingerprint.to_string(),
                        llm_justification: rec.justification.clone(),
                        llm_score: rec.llm_score,
                        user_votes: 0,
                    };
                    records.push(record.clone());
                    record
                }
            };
            created.push(stored);
        }

        Ok(created)
    }

    async fn increment_votes(&self, id: i64) -> AppResult<Option<LlmRecommendation>> {
        self.check()?;
        let mut records = self.records.write().await;
        Ok(records.iter_mut().find(|r| r.id == id).map(|record| {
            record.user_votes += 1;
            record.clone()
        }))
    }
}

/// Ingestion queue keyed by (lower-cased title, year)
#[derive(Default)]
pub struct InMemoryProcessingQueue {
    entries: RwLock<Vec<NewQueueEntry>>,
}

impl InMemoryProcessingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<NewQueueEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ProcessingQueueStore for InMemoryProcessingQueue {
    async fn enqueue_if_absent(&self, entries: &[NewQueueEntry]) -> AppResult<usize> {
        let mut queue = self.entries.write().await;
        let mut queued = 0;

        for entry in entries {
            let duplicate = queue.iter().any(|e| {
                e.title.to_lowercase() == entry.title.to_lowercase()
                    && e.release_year == entry.release_year
            });
            if !duplicate {
                queue.push(entry.clone());
                queued += 1;
            }
        }

        Ok(queued)
    }
}

#[derive(Default)]
pub struct InMemoryVoteLog {
    entries: RwLock<Vec<VoteLogEntry>>,
}

impl InMemoryVoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<VoteLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl VoteLogStore for InMemoryVoteLog {
    async fn append(&self, entry: &VoteLogEntry) -> AppResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}
