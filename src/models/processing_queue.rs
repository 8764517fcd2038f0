use serde::{Deserialize, Serialize};

/// Status of an ingestion work item: PENDING -> PROCESSING -> COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    /// Entries in these states are owned by an ingestion worker and must not be queued again
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessingStatus::Pending | ProcessingStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Manual,
    Recommendation,
    Trending,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "MANUAL",
            TriggerSource::Recommendation => "RECOMMENDATION",
            TriggerSource::Trending => "TRENDING",
        }
    }
}

/// A title the catalog does not know yet, queued for ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub source_movie_id: Option<i64>,
    pub title: String,
    pub release_year: Option<i32>,
    pub properties: serde_json::Value,
    pub trigger_source: TriggerSource,
}
