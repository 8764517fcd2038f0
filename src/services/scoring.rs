//! Effective score aggregation.
//!
//! Combines the crowd signal (vote count), the offline embedding signal
//! (`ai_score`, 0-10) and the semantic/hybrid signal (`similarity_score`, 0-1)
//! into one value in `[0, 1]`, rounded half-to-even at four decimals so the
//! stored value is stable across implementations.

/// Weights for the three signals plus the vote credibility constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub vote: f64,
    pub ai: f64,
    pub similarity: f64,
    /// Larger values make a handful of votes count for less
    pub credibility: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vote: 0.5,
            ai: 0.3,
            similarity: 0.2,
            credibility: 10.0,
        }
    }
}

impl ScoreWeights {
    /// Computes the effective score for one edge.
    ///
    /// Missing (or non-finite) `ai_score` / `similarity_score` contribute 0.
    pub fn effective_score(
        &self,
        user_votes: u64,
        ai_score: Option<f64>,
        similarity_score: Option<f64>,
    ) -> f64 {
        let votes = user_votes as f64;
        let norm_vote = (1.0 + votes).ln() / (1.0 + votes + self.credibility).ln();
        let norm_ai = finite_or_zero(ai_score) / 10.0;
        let norm_sim = finite_or_zero(similarity_score);

        let score = self.vote * norm_vote + self.ai * norm_ai + self.similarity * norm_sim;

        round_to_4(score)
    }
}

/// Effective score with the default weights.
pub fn effective_score(user_votes: u64, ai_score: Option<f64>, similarity_score: Option<f64>) -> f64 {
    ScoreWeights::default().effective_score(user_votes, ai_score, similarity_score)
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn round_to_4(value: f64) -> f64 {
    (value * 10_000.0).round_ties_even() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_inputs_score_zero() {
        assert_eq!(effective_score(0, None, None), 0.0);
    }

    #[test]
    fn test_single_vote_contributes_little() {
        // ln(2) / ln(12) * 0.5
        assert_eq!(effective_score(1, None, None), 0.1395);
    }

    #[test]
    fn test_all_signals_combined() {
        // 0.5 * ln(6)/ln(16) + 0.3 * 0.8 + 0.2 * 0.5
        assert_eq!(effective_score(5, Some(8.0), Some(0.5)), 0.6631);
    }

    #[test]
    fn test_ai_only() {
        assert_eq!(effective_score(0, Some(10.0), None), 0.3);
        assert_eq!(effective_score(0, Some(7.5), None), 0.225);
    }

    #[test]
    fn test_similarity_only() {
        assert_eq!(effective_score(0, None, Some(0.9)), 0.18);
    }

    #[test]
    fn test_non_finite_treated_as_missing() {
        assert_eq!(effective_score(0, Some(f64::NAN), Some(f64::INFINITY)), 0.0);
    }

    #[test]
    fn test_deterministic() {
        let a = effective_score(17, Some(6.3), Some(0.42));
        let b = effective_score(17, Some(6.3), Some(0.42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(round_to_4(0.00005), 0.0);
        assert_eq!(round_to_4(0.00025), 0.0002);
        assert_eq!(round_to_4(0.00035), 0.0004);
        assert_eq!(round_to_4(0.12344), 0.1234);
    }

    #[test]
    fn test_bounded_by_weight_sum() {
        let weights = ScoreWeights::default();
        let max = weights.vote + weights.ai + weights.similarity;
        for votes in [0u64, 1, 10, 1_000, 1_000_000_000] {
            for ai in [None, Some(0.0), Some(5.0), Some(10.0)] {
                for sim in [None, Some(0.0), Some(0.5), Some(1.0)] {
                    let score = effective_score(votes, ai, sim);
                    assert!((0.0..=max).contains(&score), "{votes} {ai:?} {sim:?} -> {score}");
                }
            }
        }
    }

    #[test]
    fn test_monotonic_in_votes() {
        let mut previous = 0.0;
        for votes in 0..500u64 {
            let score = effective_score(votes, Some(4.0), Some(0.3));
            assert!(score >= previous, "votes={votes}");
            previous = score;
        }
    }

    #[test]
    fn test_monotonic_in_ai_and_similarity() {
        let mut previous = 0.0;
        for step in 0..=100 {
            let score = effective_score(3, Some(step as f64 / 10.0), Some(0.2));
            assert!(score >= previous);
            previous = score;
        }

        let mut previous = 0.0;
        for step in 0..=100 {
            let score = effective_score(3, Some(2.0), Some(step as f64 / 100.0));
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_votes_approach_full_weight() {
        let score = effective_score(u64::MAX / 2, None, None);
        assert!(score > 0.45 && score <= 0.5);
    }
}
