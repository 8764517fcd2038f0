use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::{NewQueueEntry, ProcessingStatus};

/// Ingestion work queue shared with the metadata ingestion workers.
///
/// The serving side only adds PENDING entries; status transitions belong to
/// the ingestion workers.
#[async_trait]
pub trait ProcessingQueueStore: Send + Sync {
    /// Queues entries whose (title, year) has no PENDING or PROCESSING entry
    /// yet. Returns how many were queued.
    async fn enqueue_if_absent(&self, entries: &[NewQueueEntry]) -> AppResult<usize>;
}

pub struct PgProcessingQueue {
    pool: PgPool,
}

impl PgProcessingQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessingQueueStore for PgProcessingQueue {
    async fn enqueue_if_absent(&self, entries: &[NewQueueEntry]) -> AppResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut queued = 0;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO processing_queue
                    (source_movie_id, title, release_year, properties, trigger_source, status)
                SELECT $1, $2, $3, $4, $5, $6
                WHERE NOT EXISTS (
                    SELECT 1 FROM processing_queue
                    WHERE lower(title) = lower($2)
                      AND release_year IS NOT DISTINCT FROM $3
                      AND status IN ($7, $8)
                )
                "#,
            )
            .bind(entry.source_movie_id)
            .bind(&entry.title)
            .bind(entry.release_year)
            .bind(&entry.properties)
            .bind(entry.trigger_source.as_str())
            .bind(ProcessingStatus::Pending.as_str())
            .bind(ProcessingStatus::Pending.as_str())
            .bind(ProcessingStatus::Processing.as_str())
            .execute(&mut *tx)
            .await?;

            queued += result.rows_affected() as usize;
        }

        tx.commit().await?;

        tracing::info!(
            candidates = entries.len(),
            queued,
            "Queued unknown titles for ingestion"
        );

        Ok(queued)
    }
}
