pub mod cache;
pub mod graph;
pub mod memory;
pub mod movies;
pub mod postgres;
pub mod processing_queue;
pub mod recommendations;
pub mod redis;
pub mod votes_log;

pub use cache::KeyValueStore;
pub use graph::{EdgeScores, PgGraphStore, SimilarityGraphStore};
pub use movies::{MovieStore, PgMovieStore};
pub use postgres::{create_pool, run_migrations};
pub use processing_queue::{PgProcessingQueue, ProcessingQueueStore};
pub use recommendations::{PgRecommendationStore, RecommendationStore};
pub use self::redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
pub use votes_log::{PgVoteLog, VoteLogEntry, VoteLogStore};
