use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::VoteType;

/// One accepted vote, as written to the audit log
#[derive(Debug, Clone, PartialEq)]
pub struct VoteLogEntry {
    pub fingerprint: String,
    pub source_movie_id: i64,
    pub target_movie_id: i64,
    pub vote_type: VoteType,
    pub recommendation_id: Option<i64>,
}

#[async_trait]
pub trait VoteLogStore: Send + Sync {
    async fn append(&self, entry: &VoteLogEntry) -> AppResult<()>;
}

pub struct PgVoteLog {
    pool: PgPool,
}

impl PgVoteLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteLogStore for PgVoteLog {
    async fn append(&self, entry: &VoteLogEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO votes_log
                (fingerprint_id, source_movie_id, target_movie_id, vote_type, reference_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.fingerprint)
        .bind(entry.source_movie_id)
        .bind(entry.target_movie_id)
        .bind(entry.vote_type.as_str())
        .bind(entry.recommendation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
