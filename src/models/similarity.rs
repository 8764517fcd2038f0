use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// An undirected movie pair sorted into `(low, high)` order.
///
/// Voting on (A, B) and (B, A) resolves to the same pair, which is also the
/// primary key of the stored edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalPair {
    low: i64,
    high: i64,
}

impl CanonicalPair {
    /// Rejects self-pairs: a movie cannot be similar to itself.
    pub fn new(movie_id_1: i64, movie_id_2: i64) -> AppResult<Self> {
        if movie_id_1 == movie_id_2 {
            return Err(AppError::InvalidInput(
                "A movie cannot be similar to itself".to_string(),
            ));
        }

        Ok(Self {
            low: movie_id_1.min(movie_id_2),
            high: movie_id_1.max(movie_id_2),
        })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    /// The other end of the pair, if `movie_id` is one of its ends
    pub fn other(&self, movie_id: i64) -> Option<i64> {
        if movie_id == self.low {
            Some(self.high)
        } else if movie_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

/// Which stored score orders a neighbour listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    #[default]
    Effective,
    Ai,
    Similarity,
}

/// One neighbour of a movie in the similarity graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarEdge {
    pub target_id: i64,
    pub ai_score: Option<f64>,
    pub similarity_score: Option<f64>,
    pub user_votes: u64,
    pub effective_score: f64,
}

impl SimilarEdge {
    /// Value used for ordering under `kind`; missing scores sort last
    pub fn score_for(&self, kind: ScoreKind) -> Option<f64> {
        match kind {
            ScoreKind::Effective => Some(self.effective_score),
            ScoreKind::Ai => self.ai_score,
            ScoreKind::Similarity => self.similarity_score,
        }
    }
}
