//! LLM recommendation generation.
//!
//! The generator is an opaque, slow collaborator returning free text; the
//! parser pulls the structured candidate list out of it.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::Movie;

pub mod gemini;
pub mod parser;

pub use gemini::GeminiGenerator;
pub use parser::{parse_candidates, Candidate};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationGenerator: Send + Sync {
    /// Raw model output for "movies like `movie`, focusing on `keywords`"
    async fn generate(&self, movie: &Movie, keywords: &[String]) -> AppResult<String>;

    fn name(&self) -> &'static str;
}
