//! Similarity graph store.
//!
//! Movies are nodes; an edge per canonical pair carries
//! `{ai_score, similarity_score, user_votes, effective_score}`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::{CanonicalPair, ScoreKind, SimilarEdge};
use crate::retry::with_timeout;
use crate::services::scoring::ScoreWeights;

/// Stored scores of a single edge
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeScores {
    pub ai_score: Option<f64>,
    pub similarity_score: Option<f64>,
    pub user_votes: u64,
    pub effective_score: f64,
}

#[async_trait]
pub trait SimilarityGraphStore: Send + Sync {
    /// Neighbours of `movie_id` ordered by `order` descending (missing scores
    /// last), at most `limit` of them
    async fn get_top_similar(
        &self,
        movie_id: i64,
        limit: usize,
        order: ScoreKind,
    ) -> AppResult<Vec<SimilarEdge>>;

    /// Finds or creates the edge for the pair, increments `user_votes` and
    /// recomputes `effective_score`, atomically per edge.
    ///
    /// Returns `Ok(false)` when either movie is not in the graph. Connectivity
    /// faults are errors. Every call counts as a distinct vote; de-duplication
    /// belongs to the vote ledger.
    async fn upsert_vote(&self, pair: CanonicalPair) -> AppResult<bool>;

    async fn get_edge(&self, pair: CanonicalPair) -> AppResult<Option<EdgeScores>>;
}

/// Postgres adjacency-table implementation
pub struct PgGraphStore {
    pool: PgPool,
    weights: ScoreWeights,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl PgGraphStore {
    pub fn new(pool: PgPool, weights: ScoreWeights) -> Self {
        Self {
            pool,
            weights,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(120),
        }
    }

    fn order_column(order: ScoreKind) -> &'static str {
        match order {
            ScoreKind::Effective => "effective_score",
            ScoreKind::Ai => "ai_score",
            ScoreKind::Similarity => "similarity_score",
        }
    }

    async fn upsert_vote_tx(&self, pair: CanonicalPair) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        // The ON CONFLICT update holds the row lock until commit, so concurrent
        // votes on one edge are applied one after another.
        let row: Option<(i64, Option<f64>, Option<f64>)> = sqlx::query_as(
            r#"
            INSERT INTO similarity_edges (movie_a, movie_b, user_votes)
            SELECT $1, $2, 1
            WHERE EXISTS (SELECT 1 FROM movies WHERE id = $1)
              AND EXISTS (SELECT 1 FROM movies WHERE id = $2)
            ON CONFLICT (movie_a, movie_b)
            DO UPDATE SET user_votes = similarity_edges.user_votes + 1
            RETURNING user_votes, ai_score, similarity_score
            "#,
        )
        .bind(pair.low())
        .bind(pair.high())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_votes, ai_score, similarity_score)) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let effective = self
            .weights
            .effective_score(user_votes.max(0) as u64, ai_score, similarity_score);

        sqlx::query(
            "UPDATE similarity_edges SET effective_score = $3 WHERE movie_a = $1 AND movie_b = $2",
        )
        .bind(pair.low())
        .bind(pair.high())
        .bind(effective)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            movie_a = pair.low(),
            movie_b = pair.high(),
            user_votes,
            effective_score = effective,
            "Similarity edge updated"
        );

        Ok(true)
    }
}

#[async_trait]
impl SimilarityGraphStore for PgGraphStore {
    async fn get_top_similar(
        &self,
        movie_id: i64,
        limit: usize,
        order: ScoreKind,
    ) -> AppResult<Vec<SimilarEdge>> {
        let sql = format!(
            r#"
            SELECT CASE WHEN movie_a = $1 THEN movie_b ELSE movie_a END AS target_id,
                   ai_score, similarity_score, user_votes, effective_score
            FROM similarity_edges
            WHERE movie_a = $1 OR movie_b = $1
            ORDER BY {} DESC NULLS LAST
            LIMIT $2
            "#,
            Self::order_column(order)
        );

        let rows: Vec<(i64, Option<f64>, Option<f64>, i64, f64)> = with_timeout(
            self.read_timeout,
            "graph neighbour query",
            async {
                let rows = sqlx::query_as(&sql)
                    .bind(movie_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?;
                Ok::<_, AppError>(rows)
            },
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(target_id, ai_score, similarity_score, user_votes, effective_score)| SimilarEdge {
                    target_id,
                    ai_score,
                    similarity_score,
                    user_votes: user_votes.max(0) as u64,
                    effective_score,
                },
            )
            .collect())
    }

    async fn upsert_vote(&self, pair: CanonicalPair) -> AppResult<bool> {
        with_timeout(self.write_timeout, "graph vote upsert", self.upsert_vote_tx(pair)).await
    }

    async fn get_edge(&self, pair: CanonicalPair) -> AppResult<Option<EdgeScores>> {
        let row: Option<(Option<f64>, Option<f64>, i64, f64)> = sqlx::query_as(
            r#"
            SELECT ai_score, similarity_score, user_votes, effective_score
            FROM similarity_edges
            WHERE movie_a = $1 AND movie_b = $2
            "#,
        )
        .bind(pair.low())
        .bind(pair.high())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(ai_score, similarity_score, user_votes, effective_score)| EdgeScores {
            ai_score,
            similarity_score,
            user_votes: user_votes.max(0) as u64,
            effective_score,
        }))
    }
}
