use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;

use super::movies::{MovieRow, MOVIE_COLUMNS};
use crate::error::{AppError, AppResult};
use crate::models::{CanonicalPair, LlmRecommendation, Movie, NewRecommendation};
use crate::services::fingerprint::Fingerprint;

/// Durable store of LLM suggestions, keyed by request fingerprint
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Persisted suggestions for a fingerprint joined with their movie,
    /// best LLM score first
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> AppResult<Vec<(LlmRecommendation, Movie)>>;

    async fn get_by_id(&self, id: i64) -> AppResult<Option<LlmRecommendation>>;

    /// A suggestion linking the two movies, in either direction
    async fn find_by_pair(&self, pair: CanonicalPair) -> AppResult<Option<LlmRecommendation>>;

    /// Inserts all suggestions in one transaction. A suggestion already stored
    /// for the same fingerprint and movie is overwritten, so re-running a
    /// generation is harmless.
    async fn bulk_create(
        &self,
        fingerprint: &Fingerprint,
        recommendations: &[NewRecommendation],
    ) -> AppResult<Vec<LlmRecommendation>>;

    /// Increments the persisted vote count, returning the updated record
    async fn increment_votes(&self, id: i64) -> AppResult<Option<LlmRecommendation>>;
}

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: i64,
    source_movie_id: i64,
    recommended_movie_id: i64,
    trigger_keywords_hash: String,
    llm_justification: Json<Vec<String>>,
    llm_score: Option<f64>,
    user_votes: i64,
}

impl From<RecommendationRow> for LlmRecommendation {
    fn from(row: RecommendationRow) -> Self {
        LlmRecommendation {
            id: row.id,
            source_movie_id: row.source_movie_id,
            recommended_movie_id: row.recommended_movie_id,
            trigger_fingerprint: row.trigger_keywords_hash,
            llm_justification: row.llm_justification.0,
            llm_score: row.llm_score,
            user_votes: row.user_votes,
        }
    }
}

const RECOMMENDATION_COLUMNS: &str = "id, source_movie_id, recommended_movie_id, \
                                      trigger_keywords_hash, llm_justification, llm_score, user_votes";

pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> AppResult<Vec<(LlmRecommendation, Movie)>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM llm_recommendations
            WHERE trigger_keywords_hash = $1
            ORDER BY llm_score DESC NULLS LAST, id
            "#,
            RECOMMENDATION_COLUMNS
        );
        let rows: Vec<RecommendationRow> = sqlx::query_as(&sql)
            .bind(fingerprint.as_str())
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        let recommendations: Vec<LlmRecommendation> =
            rows.into_iter().map(LlmRecommendation::from).collect();
        let ids: Vec<i64> = recommendations
            .iter()
            .map(|r| r.recommended_movie_id)
            .collect();

        let sql = format!("SELECT {} FROM movies WHERE id = ANY($1)", MOVIE_COLUMNS);
        let movies: HashMap<i64, Movie> = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(&ids[..])
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| (row.id, Movie::from(row)))
            .collect();

        Ok(recommendations
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
        let sql = format!(
            "SELECT {} FROM llm_recommendations WHERE id = $1",
            RECOMMENDATION_COLUMNS
        );
        let row: Option<RecommendationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LlmRecommendation::from))
    }

    async fn find_by_pair(&self, pair: CanonicalPair) -> AppResult<Option<LlmRecommendation>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM llm_recommendations
            WHERE (source_movie_id = $1 AND recommended_movie_id = $2)
               OR (source_movie_id = $2 AND recommended_movie_id = $1)
            ORDER BY user_votes DESC, id
            LIMIT 1
            "#,
            RECOMMENDATION_COLUMNS
        );
        let row: Option<RecommendationRow> = sqlx::query_as(&sql)
            .bind(pair.low())
            .bind(pair.high())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LlmRecommendation::from))
    }

    async fn bulk_create(
        &self,
        fingerprint: &Fingerprint,
        recommendations: &[NewRecommendation],
    ) -> AppResult<Vec<LlmRecommendation>> {
        if recommendations.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            r#"
            INSERT INTO llm_recommendations
                (source_movie_id, recommended_movie_id, trigger_keywords_hash, llm_justification, llm_score)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (trigger_keywords_hash, recommended_movie_id)
            DO UPDATE SET llm_justification = EXCLUDED.llm_justification,
                          llm_score = EXCLUDED.llm_score
            RETURNING {}
            "#,
            RECOMMENDATION_COLUMNS
        );

        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(recommendations.len());

        for rec in recommendations {
            let row: RecommendationRow = sqlx::query_as(&sql)
                .bind(rec.source_movie_id)
                .bind(rec.recommended_movie_id)
                .bind(fingerprint.as_str())
                .bind(Json(&rec.justification))
                .bind(rec.llm_score)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::Persistence(format!(
                        "Failed to store recommendation {} -> {}: {}",
                        rec.source_movie_id, rec.recommended_movie_id, e
                    ))
                })?;
            created.push(LlmRecommendation::from(row));
        }

        // Dropping the transaction on an early return rolls it back
        tx.commit().await?;

        tracing::info!(
            fingerprint = %fingerprint,
            count = created.len(),
            "Stored LLM recommendations"
        );

        Ok(created)
    }

    async fn increment_votes(&self, id: i64) -> AppResult<Option<LlmRecommendation>> {
        let sql = format!(
            r#"
            UPDATE llm_recommendations
            SET user_votes = user_votes + 1
            WHERE id = $1
            RETURNING {}
            "#,
            RECOMMENDATION_COLUMNS
        );
        let row: Option<RecommendationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LlmRecommendation::from))
    }
}
