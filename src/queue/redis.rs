use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use std::time::Duration;

use super::{Delivery, JobEnvelope, JobSource, QueueName, TaskQueue};
use crate::error::{AppError, AppResult};

fn queue_key(queue: QueueName) -> String {
    format!("queue:{}", queue)
}

fn processing_key(queue: QueueName, consumer: &str) -> String {
    format!("queue:{}:processing:{}", queue, consumer)
}

/// LPUSH producer sharing the application's connection manager
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> AppResult<()> {
        let queue = envelope.job.queue();
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| AppError::Internal(format!("Job serialization error: {}", e)))?;

        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue_key(queue), payload).await?;

        tracing::debug!(
            queue = %queue,
            task = envelope.job.name(),
            request_id = envelope.request_id.as_deref().unwrap_or("-"),
            "Job enqueued"
        );
        Ok(())
    }
}

/// BLMOVE consumer with its own processing list per queue.
///
/// BLMOVE blocks its connection, so each worker owns one. `consumer` must be
/// stable across restarts for `requeue_unacked` to find what a crashed run
/// left behind, and unique among live consumers.
pub struct RedisJobSource {
    conn: MultiplexedConnection,
    consumer: String,
}

impl RedisJobSource {
    pub async fn connect(client: &Client, consumer: impl Into<String>) -> AppResult<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            consumer: consumer.into(),
        })
    }
}

#[async_trait]
impl JobSource for RedisJobSource {
    async fn next_job(&self, queue: QueueName, wait: Duration) -> AppResult<Option<Delivery>> {
        let processing = processing_key(queue, &self.consumer);
        let mut conn = self.conn.clone();
        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(queue_key(queue))
            .arg(&processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        let Some(payload) = moved else {
            return Ok(None);
        };

        match serde_json::from_str::<JobEnvelope>(&payload) {
            Ok(envelope) => Ok(Some(Delivery::new(envelope, payload))),
            Err(e) => {
                // Poison message: drop it rather than fail the worker forever
                tracing::error!(queue = %queue, error = %e, "Discarding undecodable job");
                let _: i64 = conn.lrem(&processing, 1, payload).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, queue: QueueName, delivery: &Delivery) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .lrem(processing_key(queue, &self.consumer), 1, delivery.receipt())
            .await?;
        if removed == 0 {
            tracing::warn!(queue = %queue, consumer = %self.consumer, "Acked job was not in processing list");
        }
        Ok(())
    }

    async fn requeue_unacked(&self, queue: QueueName) -> AppResult<usize> {
        let processing = processing_key(queue, &self.consumer);
        let mut conn = self.conn.clone();
        let mut requeued = 0;

        loop {
            // Back onto the consuming end so recovered jobs run first
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(queue_key(queue))
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            requeued += 1;
        }

        if requeued > 0 {
            tracing::warn!(queue = %queue, consumer = %self.consumer, requeued, "Requeued unacked jobs");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Job, VoteJob};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_queue_keys() {
        assert_eq!(queue_key(QueueName::Votes), "queue:votes");
        assert_eq!(queue_key(QueueName::Llm), "queue:llm");
        assert_eq!(
            processing_key(QueueName::Votes, "api-0"),
            "queue:votes:processing:api-0"
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_unacked_job_survives_consumer_restart() {
        let client = Client::open(redis_url()).unwrap();
        let producer = RedisTaskQueue::new(client.get_connection_manager().await.unwrap());
        let consumer = "test-restart";
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(queue_key(QueueName::Votes)).await.unwrap();
        let _: () = conn.del(processing_key(QueueName::Votes, consumer)).await.unwrap();

        let envelope = JobEnvelope::new(
            Job::ProcessVote(VoteJob {
                movie_id_1: 1,
                movie_id_2: 2,
                fingerprint: "user".to_string(),
                recommendation_id: None,
            }),
            None,
        );
        producer.enqueue(envelope.clone()).await.unwrap();

        // First run fetches and dies before acking
        let crashed = RedisJobSource::connect(&client, consumer).await.unwrap();
        let lost = crashed
            .next_job(QueueName::Votes, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lost.envelope, envelope);
        drop(crashed);

        let restarted = RedisJobSource::connect(&client, consumer).await.unwrap();
        assert_eq!(restarted.requeue_unacked(QueueName::Votes).await.unwrap(), 1);
        let delivery = restarted
            .next_job(QueueName::Votes, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.envelope, envelope);

        restarted.ack(QueueName::Votes, &delivery).await.unwrap();
        assert_eq!(restarted.requeue_unacked(QueueName::Votes).await.unwrap(), 0);
    }
}
