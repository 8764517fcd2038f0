//! Background task queue.
//!
//! Delivery is at-least-once with no ordering guarantee; consumers must
//! tolerate duplicates. A fetched job stays in its consumer's processing list
//! until acked, and a restarted consumer puts whatever it left there back on
//! the queue. Each job carries the id of the request that caused it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

use crate::error::AppResult;
use crate::services::fingerprint::Fingerprint;

pub mod memory;
pub mod redis;

pub use memory::InMemoryTaskQueue;
pub use self::redis::{RedisJobSource, RedisTaskQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Votes,
    Llm,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Votes => "votes",
            QueueName::Llm => "llm",
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A vote that passed the ledger and still has to reach the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteJob {
    pub movie_id_1: i64,
    pub movie_id_2: i64,
    pub fingerprint: String,
    /// Set when the vote agrees with a persisted LLM recommendation
    #[serde(default)]
    pub recommendation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub source_movie_id: i64,
    pub keywords: Vec<String>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum Job {
    ProcessVote(VoteJob),
    GenerateRecommendations(EnrichmentRequest),
}

impl Job {
    pub fn queue(&self) -> QueueName {
        match self {
            Job::ProcessVote(_) => QueueName::Votes,
            Job::GenerateRecommendations(_) => QueueName::Llm,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::ProcessVote(_) => "process_vote",
            Job::GenerateRecommendations(_) => "generate_recommendations",
        }
    }
}

/// Wire format of a queued job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub job: Job,
}

impl JobEnvelope {
    pub fn new(job: Job, request_id: Option<String>) -> Self {
        Self {
            request_id,
            enqueued_at: Utc::now(),
            job,
        }
    }
}

/// A fetched job, held by its consumer until acked
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub envelope: JobEnvelope,
    receipt: String,
}

impl Delivery {
    pub(crate) fn new(envelope: JobEnvelope, receipt: String) -> Self {
        Self { envelope, receipt }
    }

    /// Identifies this delivery in the consumer's processing list
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

/// Producer side: fire-and-forget dispatch
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope) -> AppResult<()>;
}

/// Consumer side of a queue
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Waits up to `wait` for the next job of `queue` and moves it into this
    /// consumer's processing list
    async fn next_job(&self, queue: QueueName, wait: Duration) -> AppResult<Option<Delivery>>;

    /// Removes a finished delivery from the processing list, whether the job
    /// succeeded or exhausted its retries
    async fn ack(&self, queue: QueueName, delivery: &Delivery) -> AppResult<()>;

    /// Moves every unacked delivery of this consumer back onto `queue`.
    /// Called once before the consumer starts fetching.
    async fn requeue_unacked(&self, queue: QueueName) -> AppResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = JobEnvelope::new(
            Job::ProcessVote(VoteJob {
                movie_id_1: 42,
                movie_id_2: 7,
                fingerprint: "user".to_string(),
                recommendation_id: None,
            }),
            Some("req-1".to_string()),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["job"]["task"], "process_vote");
        assert_eq!(json["job"]["args"]["movie_id_1"], 42);
        assert_eq!(json["request_id"], "req-1");

        let back: JobEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_jobs_route_to_their_queue() {
        let vote = Job::ProcessVote(VoteJob {
            movie_id_1: 1,
            movie_id_2: 2,
            fingerprint: "u".to_string(),
            recommendation_id: Some(3),
        });
        let generate = Job::GenerateRecommendations(EnrichmentRequest {
            source_movie_id: 42,
            keywords: vec!["heist".to_string()],
            fingerprint: Fingerprint::new(42, &["heist"]),
        });
        assert_eq!(vote.queue(), QueueName::Votes);
        assert_eq!(generate.queue(), QueueName::Llm);
        assert_eq!(generate.name(), "generate_recommendations");
    }
}
