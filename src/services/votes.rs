//! Vote intake and background vote processing.
//!
//! Intake runs on the request path: validate, check the ledger, enqueue.
//! The processor runs in a worker and applies the vote to the graph, then
//! reconciles it with a matching LLM recommendation and writes the audit log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::{RecommendationStore, SimilarityGraphStore, VoteLogEntry, VoteLogStore};
use crate::error::{AppError, AppResult};
use crate::models::{CanonicalPair, VoteRequest, VoteResponse, VoteTarget, VoteType};
use crate::queue::{Job, JobEnvelope, TaskQueue, VoteJob};
use crate::retry::{retry, RetryPolicy};
use crate::services::vote_ledger::VoteLedger;

pub const VOTE_ACCEPTED_MESSAGE: &str = "Vote accepted and is being processed.";

pub struct VoteService {
    ledger: VoteLedger,
    recommendations: Arc<dyn RecommendationStore>,
    queue: Arc<dyn TaskQueue>,
}

impl VoteService {
    pub fn new(
        ledger: VoteLedger,
        recommendations: Arc<dyn RecommendationStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            ledger,
            recommendations,
            queue,
        }
    }

    /// Accepts a vote for background processing.
    ///
    /// Self-pairs are rejected before the ledger is consulted. The ledger
    /// record is written before the job is queued; if queueing fails the
    /// record is released so the user can try again.
    pub async fn submit(
        &self,
        request: VoteRequest,
        request_id: Option<String>,
    ) -> AppResult<VoteResponse> {
        let fingerprint = request.fingerprint().trim().to_string();
        if fingerprint.is_empty() {
            return Err(AppError::InvalidInput("fingerprint is required".to_string()));
        }

        let (target, job) = match request {
            VoteRequest::Pair {
                movie_id_1,
                movie_id_2,
                ..
            } => {
                let pair = CanonicalPair::new(movie_id_1, movie_id_2)?;
                let job = VoteJob {
                    movie_id_1,
                    movie_id_2,
                    fingerprint: fingerprint.clone(),
                    recommendation_id: None,
                };
                (VoteTarget::Pair(pair), job)
            }
            VoteRequest::Recommendation {
                recommendation_id, ..
            } => {
                let rec = self
                    .recommendations
                    .get_by_id(recommendation_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Recommendation {} not found", recommendation_id))
                    })?;
                let job = VoteJob {
                    movie_id_1: rec.source_movie_id,
                    movie_id_2: rec.recommended_movie_id,
                    fingerprint: fingerprint.clone(),
                    recommendation_id: Some(rec.id),
                };
                (VoteTarget::Recommendation(rec.id), job)
            }
        };

        self.ledger.admit(&fingerprint, target).await?;

        let envelope = JobEnvelope::new(Job::ProcessVote(job), request_id);
        if let Err(e) = self.queue.enqueue(envelope).await {
            tracing::error!(vote_target = %target, error = %e, "Failed to enqueue vote");
            if let Err(release_err) = self.ledger.release(&fingerprint, target).await {
                tracing::warn!(error = %release_err, "Failed to release vote record");
            }
            return Err(e);
        }

        tracing::info!(vote_target = %target, "Vote accepted");

        Ok(VoteResponse {
            message: VOTE_ACCEPTED_MESSAGE.to_string(),
        })
    }
}

/// Stages a vote job has already completed. Shared across retries of the
/// same job so a retry resumes where the previous attempt stopped and never
/// applies a stage twice.
#[derive(Debug, Default)]
pub struct VoteProgress {
    graph_updated: AtomicBool,
    reconciled: AtomicBool,
    logged: AtomicBool,
}

impl VoteProgress {
    fn done(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }

    fn mark(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Applied { reconciled_recommendation: Option<i64> },
    /// One of the movies is not in the graph; nothing was written
    MissingMovie,
}

pub struct VoteProcessor {
    graph: Arc<dyn SimilarityGraphStore>,
    recommendations: Arc<dyn RecommendationStore>,
    log: Arc<dyn VoteLogStore>,
    graph_policy: RetryPolicy,
}

impl VoteProcessor {
    pub fn new(
        graph: Arc<dyn SimilarityGraphStore>,
        recommendations: Arc<dyn RecommendationStore>,
        log: Arc<dyn VoteLogStore>,
    ) -> Self {
        Self {
            graph,
            recommendations,
            log,
            graph_policy: RetryPolicy::graph_write(),
        }
    }

    pub fn with_graph_policy(mut self, policy: RetryPolicy) -> Self {
        self.graph_policy = policy;
        self
    }

    pub async fn process(&self, job: &VoteJob, progress: &VoteProgress) -> AppResult<VoteOutcome> {
        let pair = CanonicalPair::new(job.movie_id_1, job.movie_id_2)?;

        if !VoteProgress::done(&progress.graph_updated) {
            let applied = retry(self.graph_policy, "graph_upsert_vote", || {
                self.graph.upsert_vote(pair)
            })
            .await?;

            if !applied {
                tracing::warn!(
                    movie_a = pair.low(),
                    movie_b = pair.high(),
                    "Vote references a movie missing from the graph"
                );
                return Ok(VoteOutcome::MissingMovie);
            }
            VoteProgress::mark(&progress.graph_updated);
        }

        let mut reconciled_recommendation = None;
        if !VoteProgress::done(&progress.reconciled) {
            let rec = match job.recommendation_id {
                Some(id) => self.recommendations.get_by_id(id).await?,
                None => self.recommendations.find_by_pair(pair).await?,
            };

            if let Some(rec) = rec {
                if let Some(updated) = self.recommendations.increment_votes(rec.id).await? {
                    tracing::debug!(
                        recommendation_id = updated.id,
                        user_votes = updated.user_votes,
                        "Recommendation vote reconciled"
                    );
                    reconciled_recommendation = Some(updated.id);
                }
            }
            VoteProgress::mark(&progress.reconciled);
        }

        if !VoteProgress::done(&progress.logged) {
            let entry = VoteLogEntry {
                fingerprint: job.fingerprint.clone(),
                source_movie_id: job.movie_id_1,
                target_movie_id: job.movie_id_2,
                vote_type: if job.recommendation_id.is_some() {
                    VoteType::LlmAgreement
                } else {
                    VoteType::DirectLink
                },
                recommendation_id: job.recommendation_id,
            };
            self.log.append(&entry).await?;
            VoteProgress::mark(&progress.logged);
        }

        tracing::info!(
            movie_a = pair.low(),
            movie_b = pair.high(),
            reconciled = reconciled_recommendation.is_some(),
            "Vote processed"
        );

        Ok(VoteOutcome::Applied {
            reconciled_recommendation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{
        InMemoryGraphStore, InMemoryMovieStore, InMemoryRecommendationStore, InMemoryStore,
        InMemoryVoteLog,
    };
    use crate::models::NewRecommendation;
    use crate::queue::{InMemoryTaskQueue, QueueName};
    use crate::retry::Backoff;
    use crate::services::fingerprint::Fingerprint;
    use crate::services::vote_ledger::VotePolicy;
    use std::time::Duration;

    struct Fixture {
        service: VoteService,
        processor: VoteProcessor,
        queue: Arc<InMemoryTaskQueue>,
        graph: Arc<InMemoryGraphStore>,
        recommendations: Arc<InMemoryRecommendationStore>,
        log: Arc<InMemoryVoteLog>,
        store: Arc<InMemoryStore>,
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let graph = Arc::new(InMemoryGraphStore::default());
        let recommendations = Arc::new(InMemoryRecommendationStore::new(Arc::new(
            InMemoryMovieStore::new(),
        )));
        let log = Arc::new(InMemoryVoteLog::new());

        for id in [7, 8, 42] {
            graph.add_movie(id);
        }

        let ledger = VoteLedger::new(store.clone(), VotePolicy::default());
        let service = VoteService::new(ledger, recommendations.clone(), queue.clone());
        let processor = VoteProcessor::new(graph.clone(), recommendations.clone(), log.clone())
            .with_graph_policy(fast_policy());

        Fixture {
            service,
            processor,
            queue,
            graph,
            recommendations,
            log,
            store,
        }
    }

    fn pair_vote(a: i64, b: i64) -> VoteRequest {
        VoteRequest::Pair {
            movie_id_1: a,
            movie_id_2: b,
            fingerprint: "user".to_string(),
        }
    }

    async fn seed_recommendation(f: &Fixture) -> i64 {
        let created = f
            .recommendations
            .bulk_create(
                &Fingerprint::new(42, &["heist"]),
                &[NewRecommendation {
                    source_movie_id: 42,
                    recommended_movie_id: 7,
                    justification: vec![],
                    llm_score: Some(8.0),
                }],
            )
            .await
            .unwrap();
        created[0].id
    }

    fn vote_job(envelope: &JobEnvelope) -> VoteJob {
        match &envelope.job {
            Job::ProcessVote(job) => job.clone(),
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_vote_rejected_before_ledger() {
        let f = fixture();
        let result = f.service.submit(pair_vote(42, 42), None).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert!(f.queue.is_empty(QueueName::Votes).await);

        // The ledger was never touched, so even an offline store is irrelevant
        f.store.set_available(false);
        let result = f.service.submit(pair_vote(42, 42), None).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_accepted_vote_is_queued() {
        let f = fixture();
        let response = f
            .service
            .submit(pair_vote(42, 7), Some("req-9".to_string()))
            .await
            .unwrap();
        assert_eq!(response.message, VOTE_ACCEPTED_MESSAGE);

        let jobs = f.queue.drain(QueueName::Votes).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].request_id.as_deref(), Some("req-9"));
        assert_eq!(vote_job(&jobs[0]).movie_id_1, 42);
    }

    #[tokio::test]
    async fn test_duplicate_vote_reversed_pair_rate_limited() {
        let f = fixture();
        f.service.submit(pair_vote(42, 7), None).await.unwrap();
        let result = f.service.submit(pair_vote(7, 42), None).await;
        assert!(matches!(result, Err(AppError::RateLimited(_))));
        assert_eq!(f.queue.len(QueueName::Votes).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_recommendation_not_found() {
        let f = fixture();
        let result = f
            .service
            .submit(
                VoteRequest::Recommendation {
                    recommendation_id: 999,
                    fingerprint: "user".to_string(),
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_queue_failure_releases_ledger_record() {
        let f = fixture();
        f.queue.set_rejecting(true);
        assert!(f.service.submit(pair_vote(42, 7), None).await.is_err());

        f.queue.set_rejecting(false);
        f.service.submit(pair_vote(42, 7), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_fingerprint_rejected() {
        let f = fixture();
        let request = VoteRequest::Pair {
            movie_id_1: 1,
            movie_id_2: 2,
            fingerprint: "  ".to_string(),
        };
        let result = f.service.submit(request, None).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_process_pair_vote_updates_graph_and_log() {
        let f = fixture();
        f.service.submit(pair_vote(42, 7), None).await.unwrap();
        let job = vote_job(&f.queue.drain(QueueName::Votes).await[0]);

        let outcome = f
            .processor
            .process(&job, &VoteProgress::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            VoteOutcome::Applied {
                reconciled_recommendation: None
            }
        );

        let edge = f
            .graph
            .get_edge(CanonicalPair::new(7, 42).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.user_votes, 1);

        let log = f.log.entries().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].vote_type, VoteType::DirectLink);
    }

    #[tokio::test]
    async fn test_recommendation_vote_reconciles() {
        let f = fixture();
        let rec_id = seed_recommendation(&f).await;

        f.service
            .submit(
                VoteRequest::Recommendation {
                    recommendation_id: rec_id,
                    fingerprint: "user".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        let job = vote_job(&f.queue.drain(QueueName::Votes).await[0]);
        assert_eq!(job.recommendation_id, Some(rec_id));

        let outcome = f
            .processor
            .process(&job, &VoteProgress::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            VoteOutcome::Applied {
                reconciled_recommendation: Some(rec_id)
            }
        );

        let rec = f.recommendations.get_by_id(rec_id).await.unwrap().unwrap();
        assert_eq!(rec.user_votes, 1);
        let edge = f
            .graph
            .get_edge(CanonicalPair::new(42, 7).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.user_votes, 1);
        assert_eq!(f.log.entries().await[0].vote_type, VoteType::LlmAgreement);
    }

    #[tokio::test]
    async fn test_pair_vote_matching_recommendation_reconciles() {
        let f = fixture();
        let rec_id = seed_recommendation(&f).await;

        let job = VoteJob {
            movie_id_1: 7,
            movie_id_2: 42,
            fingerprint: "user".to_string(),
            recommendation_id: None,
        };
        let outcome = f
            .processor
            .process(&job, &VoteProgress::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            VoteOutcome::Applied {
                reconciled_recommendation: Some(rec_id)
            }
        );
    }

    #[tokio::test]
    async fn test_missing_movie_is_not_an_error() {
        let f = fixture();
        let job = VoteJob {
            movie_id_1: 42,
            movie_id_2: 999,
            fingerprint: "user".to_string(),
            recommendation_id: None,
        };
        let outcome = f
            .processor
            .process(&job, &VoteProgress::default())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::MissingMovie);
        assert!(f.log.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_graph_failure_retried() {
        let f = fixture();
        f.graph.fail_next_writes(2);
        let job = VoteJob {
            movie_id_1: 42,
            movie_id_2: 8,
            fingerprint: "user".to_string(),
            recommendation_id: None,
        };

        f.processor
            .process(&job, &VoteProgress::default())
            .await
            .unwrap();
        let edge = f
            .graph
            .get_edge(CanonicalPair::new(8, 42).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.user_votes, 1);
    }

    #[tokio::test]
    async fn test_retry_after_later_stage_failure_does_not_double_count() {
        let f = fixture();
        let rec_id = seed_recommendation(&f).await;
        let job = VoteJob {
            movie_id_1: 42,
            movie_id_2: 7,
            fingerprint: "user".to_string(),
            recommendation_id: Some(rec_id),
        };
        let progress = VoteProgress::default();

        f.recommendations.set_available(false);
        assert!(f.processor.process(&job, &progress).await.is_err());

        f.recommendations.set_available(true);
        f.processor.process(&job, &progress).await.unwrap();

        let edge = f
            .graph
            .get_edge(CanonicalPair::new(42, 7).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.user_votes, 1);
        let rec = f.recommendations.get_by_id(rec_id).await.unwrap().unwrap();
        assert_eq!(rec.user_votes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_are_all_counted() {
        let graph = Arc::new(InMemoryGraphStore::default());
        graph.add_movie(1);
        graph.add_movie(2);
        let recommendations = Arc::new(InMemoryRecommendationStore::new(Arc::new(
            InMemoryMovieStore::new(),
        )));
        let processor = Arc::new(VoteProcessor::new(
            graph.clone(),
            recommendations,
            Arc::new(InMemoryVoteLog::new()),
        ));

        let voters = 50;
        let handles: Vec<_> = (0..voters)
            .map(|i| {
                let processor = processor.clone();
                tokio::spawn(async move {
                    let job = VoteJob {
                        movie_id_1: 1,
                        movie_id_2: 2,
                        fingerprint: format!("voter-{}", i),
                        recommendation_id: None,
                    };
                    processor.process(&job, &VoteProgress::default()).await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let edge = graph
            .get_edge(CanonicalPair::new(1, 2).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.user_votes, voters);
    }
}
