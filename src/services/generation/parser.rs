use serde::Deserialize;

use crate::error::AppError;

const FENCE_START: &str = "```json";
const FENCE_END: &str = "```";

/// One suggestion as produced by the model, before catalog resolution
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub title: String,
    #[serde(default, alias = "release_year")]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub justification: Vec<String>,
    #[serde(default, alias = "ai_score")]
    pub score: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Wrapped { movies: Vec<serde_json::Value> },
    List(Vec<serde_json::Value>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => vec![],
    })
}

/// Body of the first ```json fenced block, trimmed
pub fn extract_fenced_json(raw: &str) -> Option<&str> {
    let start = raw.find(FENCE_START)? + FENCE_START.len();
    let end = raw[start..].find(FENCE_END)? + start;
    let body = raw[start..end].trim();
    (!body.is_empty()).then_some(body)
}

fn try_parse(raw: &str) -> Result<Vec<Candidate>, AppError> {
    let body = extract_fenced_json(raw)
        .ok_or_else(|| AppError::MalformedUpstream("no fenced json block".to_string()))?;

    let payload: Payload = serde_json::from_str(body)
        .map_err(|e| AppError::MalformedUpstream(format!("invalid json: {}", e)))?;

    let items = match payload {
        Payload::Wrapped { movies } => movies,
        Payload::List(items) => items,
    };

    // A single bad entry must not cost the rest of the list
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Candidate>(item) {
            Ok(candidate) if !candidate.title.trim().is_empty() => Some(candidate),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed candidate");
                None
            }
        })
        .collect())
}

/// Extracts candidates from raw model output.
///
/// Missing, empty or invalid blocks yield no candidates instead of an error.
pub fn parse_candidates(raw: &str) -> Vec<Candidate> {
    match try_parse(raw) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding generation output");
            vec![]
        }
    }
}
