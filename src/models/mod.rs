pub mod movie;
pub mod processing_queue;
pub mod recommendation;
pub mod similarity;
pub mod vote;

pub use movie::{Genre, Movie, TrendingPage};
pub use processing_queue::{NewQueueEntry, ProcessingStatus, TriggerSource};
pub use recommendation::{
    LlmRecommendation, NewRecommendation, RecommendationRequest, RecommendationResponse,
    RecommendationResult, RecommendationStatus,
};
pub use similarity::{CanonicalPair, ScoreKind, SimilarEdge};
pub use vote::{VoteRequest, VoteResponse, VoteTarget, VoteType};
