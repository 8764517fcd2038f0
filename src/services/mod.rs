pub mod enrichment;
pub mod fingerprint;
pub mod generation;
pub mod recommendation_cache;
pub mod recommendations;
pub mod scoring;
pub mod vote_ledger;
pub mod votes;

pub use enrichment::{Enricher, EnrichmentOutcome};
pub use recommendation_cache::{CacheTier, RecommendationCache};
pub use recommendations::RecommendationOrchestrator;
pub use vote_ledger::{VoteLedger, VotePolicy};
pub use votes::{VoteOutcome, VoteProcessor, VoteProgress, VoteService};
