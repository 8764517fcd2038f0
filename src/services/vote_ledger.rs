//! Per-user vote eligibility.
//!
//! A vote record is an expiring key: present means "already voted on this
//! target", absent means eligible. A second fixed-window counter caps how many
//! votes one fingerprint may cast per day. Every store failure rejects the vote.

use std::sync::Arc;

use crate::db::{CacheKey, KeyValueStore};
use crate::error::{AppError, AppResult};
use crate::models::VoteTarget;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    /// How long a vote on one target blocks another vote on it
    pub pair_cooldown_secs: u64,
    pub max_votes_per_day: u64,
    pub daily_window_secs: u64,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            pair_cooldown_secs: 90 * DAY_SECS,
            max_votes_per_day: 4,
            daily_window_secs: DAY_SECS,
        }
    }
}

#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn KeyValueStore>,
    policy: VotePolicy,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: VotePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> VotePolicy {
        self.policy
    }

    fn vote_key(fingerprint: &str, target: VoteTarget) -> CacheKey {
        CacheKey::Vote {
            fingerprint: fingerprint.to_string(),
            target,
        }
    }

    /// Whether `fingerprint` may vote on `target` right now
    pub async fn can_vote(&self, fingerprint: &str, target: VoteTarget) -> AppResult<bool> {
        let exists = self
            .store
            .exists(&Self::vote_key(fingerprint, target))
            .await
            .map_err(fail_closed)?;
        Ok(!exists)
    }

    /// Marks `target` as voted for `cooldown_secs`.
    ///
    /// Returns false when a record already existed, i.e. a concurrent request
    /// won the race for the same vote.
    pub async fn record_vote(
        &self,
        fingerprint: &str,
        target: VoteTarget,
        cooldown_secs: u64,
    ) -> AppResult<bool> {
        self.store
            .set_nx_ex(
                &Self::vote_key(fingerprint, target),
                "1".to_string(),
                cooldown_secs,
            )
            .await
            .map_err(fail_closed)
    }

    /// Full eligibility check for a new vote.
    ///
    /// Rejects with `RateLimited` when the target is in cooldown or the daily
    /// cap is reached, otherwise records the vote. The daily counter counts
    /// attempts that passed the cooldown check, minus those that lost the race
    /// for the vote record.
    pub async fn admit(&self, fingerprint: &str, target: VoteTarget) -> AppResult<()> {
        if !self.can_vote(fingerprint, target).await? {
            tracing::info!(fingerprint, vote_target = %target, "Vote rejected: cooldown active");
            return Err(AppError::RateLimited(
                "You have already voted on this recently".to_string(),
            ));
        }

        let today = self
            .store
            .incr_window(
                &CacheKey::DailyVotes(fingerprint.to_string()),
                self.policy.daily_window_secs,
            )
            .await
            .map_err(fail_closed)?;

        if today > self.policy.max_votes_per_day {
            tracing::info!(fingerprint, votes_today = today, "Vote rejected: daily cap reached");
            return Err(AppError::RateLimited(format!(
                "Daily vote limit of {} reached",
                self.policy.max_votes_per_day
            )));
        }

        if !self
            .record_vote(fingerprint, target, self.policy.pair_cooldown_secs)
            .await?
        {
            self.refund_daily(fingerprint).await;
            return Err(AppError::RateLimited(
                "You have already voted on this recently".to_string(),
            ));
        }

        tracing::debug!(fingerprint, vote_target = %target, votes_today = today, "Vote admitted");
        Ok(())
    }

    /// Drops a vote record and gives back its daily quota so the user may
    /// retry. Used when the vote could not be handed to the background queue.
    pub async fn release(&self, fingerprint: &str, target: VoteTarget) -> AppResult<()> {
        self.store.delete(&Self::vote_key(fingerprint, target)).await?;
        self.refund_daily(fingerprint).await;
        Ok(())
    }

    /// Undoes one daily counter increment for a vote that never took effect
    async fn refund_daily(&self, fingerprint: &str) {
        if let Err(e) = self
            .store
            .decr_window(&CacheKey::DailyVotes(fingerprint.to_string()))
            .await
        {
            tracing::warn!(fingerprint, error = %e, "Failed to refund daily vote quota");
        }
    }
}

fn fail_closed(err: AppError) -> AppError {
    tracing::error!(error = %err, "Vote ledger unavailable, rejecting vote");
    match err {
        AppError::UpstreamUnavailable(_) => err,
        other => AppError::UpstreamUnavailable(format!("Vote ledger unavailable: {}", other)),
    }
}
