use serde::{Deserialize, Serialize};

use super::{Movie, SimilarEdge};

/// Request body for the recommendation query
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub source_movie_id: i64,
    #[serde(default)]
    pub selected_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    /// Served from the hot cache or the persisted LLM recommendations
    Complete,
    /// Served from the cheap graph fallback; enrichment may still upgrade it
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResponse {
    pub status: RecommendationStatus,
    pub results: Vec<RecommendationResult>,
}

/// One result card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResult {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    pub release_year: Option<i32>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub justification: Vec<String>,
    pub score: f64,
    /// Present on LLM-backed results; clients vote on it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<i64>,
}

impl RecommendationResult {
    /// Builds a fallback card from a graph neighbour
    pub fn from_edge(movie: &Movie, edge: &SimilarEdge, justification: Vec<String>) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            overview: movie.overview.clone(),
            release_year: movie.year(),
            poster_path: movie.poster_path.clone(),
            justification,
            score: edge.effective_score,
            recommendation_id: None,
        }
    }

    /// Builds an enriched card from a persisted LLM recommendation
    pub fn from_recommendation(movie: &Movie, rec: &LlmRecommendation) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            overview: movie.overview.clone(),
            release_year: movie.year(),
            poster_path: movie.poster_path.clone(),
            justification: rec.llm_justification.clone(),
            score: rec.llm_score.unwrap_or(0.0),
            recommendation_id: Some(rec.id),
        }
    }
}

/// Persisted LLM suggestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmRecommendation {
    pub id: i64,
    pub source_movie_id: i64,
    pub recommended_movie_id: i64,
    pub trigger_fingerprint: String,
    pub llm_justification: Vec<String>,
    pub llm_score: Option<f64>,
    pub user_votes: i64,
}

/// LLM suggestion resolved against the catalog, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecommendation {
    pub source_movie_id: i64,
    pub recommended_movie_id: i64,
    pub justification: Vec<String>,
    pub llm_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::movie::sample_movie;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RecommendationStatus::Partial).unwrap(),
            "\"partial\""
        );
        assert_eq!(
            serde_json::to_string(&RecommendationStatus::Complete).unwrap(),
            "\"complete\""
        );
    }

    #[test]
    fn test_request_keywords_default_empty() {
        let request: RecommendationRequest =
            serde_json::from_str(r#"{"source_movie_id": 42}"#).unwrap();
        assert_eq!(request.source_movie_id, 42);
        assert!(request.selected_keywords.is_empty());
    }

    #[test]
    fn test_fallback_result_omits_recommendation_id() {
        let movie = sample_movie(7, "Heat", &[]);
        let edge = SimilarEdge {
            target_id: 7,
            ai_score: Some(8.0),
            similarity_score: None,
            user_votes: 2,
            effective_score: 0.42,
        };
        let result = RecommendationResult::from_edge(&movie, &edge, vec!["heist".to_string()]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["score"], 0.42);
        assert_eq!(json["justification"][0], "heist");
        assert!(json.get("recommendation_id").is_none());
    }

    #[test]
    fn test_recommendation_result_carries_id() {
        let movie = sample_movie(7, "Heat", &[]);
        let rec = LlmRecommendation {
            id: 99,
            source_movie_id: 42,
            recommended_movie_id: 7,
            trigger_fingerprint: "fp".to_string(),
            llm_justification: vec!["crew".to_string()],
            llm_score: Some(8.5),
            user_votes: 0,
        };
        let result = RecommendationResult::from_recommendation(&movie, &rec);
        assert_eq!(result.recommendation_id, Some(99));
        assert_eq!(result.score, 8.5);
    }
}
