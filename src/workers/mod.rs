//! Background job workers.
//!
//! Each worker pulls one job at a time from its queue and runs it under the
//! job kind's retry policy, then acks it. Jobs that exhaust their retries are
//! logged and acked as well; the request that caused them has already been
//! answered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::AppResult;
use crate::queue::{Job, JobEnvelope, JobSource, QueueName};
use crate::retry::{retry_any, RetryPolicy};
use crate::services::{Enricher, VoteProcessor, VoteProgress};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobPolicies {
    pub vote: RetryPolicy,
    pub enrichment: RetryPolicy,
}

impl Default for JobPolicies {
    fn default() -> Self {
        Self {
            vote: RetryPolicy::vote_job(),
            enrichment: RetryPolicy::enrichment_job(),
        }
    }
}

/// Executes a single job envelope
pub struct JobRunner {
    votes: VoteProcessor,
    enricher: Enricher,
    policies: JobPolicies,
}

impl JobRunner {
    pub fn new(votes: VoteProcessor, enricher: Enricher) -> Self {
        Self {
            votes,
            enricher,
            policies: JobPolicies::default(),
        }
    }

    pub fn with_policies(mut self, policies: JobPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Runs `envelope` to completion or retry exhaustion
    pub async fn run(&self, envelope: &JobEnvelope) -> AppResult<()> {
        let span = tracing::info_span!(
            "job",
            task = envelope.job.name(),
            queue = %envelope.job.queue(),
            request_id = envelope.request_id.as_deref().unwrap_or("-"),
        );

        self.execute(&envelope.job).instrument(span).await
    }

    async fn execute(&self, job: &Job) -> AppResult<()> {
        match job {
            Job::ProcessVote(vote) => {
                let progress = VoteProgress::default();
                let outcome = retry_any(self.policies.vote, job.name(), || {
                    self.votes.process(vote, &progress)
                })
                .await?;
                tracing::info!(?outcome, "Vote processed");
            }
            Job::GenerateRecommendations(request) => {
                let outcome = retry_any(self.policies.enrichment, job.name(), || {
                    self.enricher.run(request)
                })
                .await?;
                tracing::info!(
                    stored = outcome.stored,
                    unresolved = outcome.unresolved,
                    "Enrichment finished"
                );
            }
        }
        Ok(())
    }
}

/// Long-running workers, `count` per queue
pub struct WorkerPool {
    stop_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    /// Starts one worker on `queue`
    pub fn spawn(&mut self, queue: QueueName, source: Arc<dyn JobSource>, runner: Arc<JobRunner>) {
        let worker_id = self.workers.len();
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = tokio::spawn(async move {
            tracing::info!(worker_id, %queue, "Worker started");

            while !stop_flag.load(Ordering::Relaxed) {
                let delivery = match source.next_job(queue, POLL_INTERVAL).await {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(worker_id, %queue, error = %e, "Failed to fetch job");
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                };

                if let Err(e) = runner.run(&delivery.envelope).await {
                    tracing::error!(worker_id, %queue, error = %e, "Job dropped");
                }
                // A failed ack only means the job may run again after a restart
                if let Err(e) = source.ack(queue, &delivery).await {
                    tracing::error!(worker_id, %queue, error = %e, "Failed to ack job");
                }
            }

            tracing::info!(worker_id, %queue, "Worker stopped");
        });

        self.workers.push(handle);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Signals every worker and waits for in-flight jobs to finish
    pub async fn shutdown(self) {
        tracing::info!(workers = self.workers.len(), "Shutting down worker pool");
        self.stop_flag.store(true, Ordering::Relaxed);

        for (idx, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker_id = idx, error = %e, "Worker join failed");
            }
        }

        tracing::info!("Worker pool shut down");
    }
}
