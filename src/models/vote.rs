use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::CanonicalPair;

/// Vote submission body.
///
/// Either a direct "these two movies are similar" link, or agreement with a
/// persisted LLM recommendation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VoteRequest {
    Recommendation {
        recommendation_id: i64,
        fingerprint: String,
    },
    Pair {
        movie_id_1: i64,
        movie_id_2: i64,
        fingerprint: String,
    },
}

impl VoteRequest {
    pub fn fingerprint(&self) -> &str {
        match self {
            VoteRequest::Recommendation { fingerprint, .. } => fingerprint,
            VoteRequest::Pair { fingerprint, .. } => fingerprint,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    DirectLink,
    LlmAgreement,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::DirectLink => "direct_link",
            VoteType::LlmAgreement => "llm_agreement",
        }
    }
}

/// What a user is voting on, as seen by the vote ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteTarget {
    Pair(CanonicalPair),
    Recommendation(i64),
}

impl Display for VoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteTarget::Pair(pair) => write!(f, "{}:{}", pair.low(), pair.high()),
            VoteTarget::Recommendation(id) => write!(f, "rec:{}", id),
        }
    }
}
