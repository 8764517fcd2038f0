use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RecommendationGenerator;
use crate::error::{AppError, AppResult};
use crate::models::Movie;
use crate::retry::with_timeout;

const SYSTEM_PROMPT: &str = "You are a film curator. Recommend up to 10 movies similar to the \
liked movie, focusing on the liked keywords. Answer with one ```json fenced block shaped as \
{\"movies\": [{\"title\": string, \"year\": number, \"justification\": [string], \"ai_score\": number 0-10}]}. \
Only recommend movies that exist; never recommend the liked movie itself.";

const TEMPERATURE: f32 = 0.25;

/// Gemini `generateContent` client
#[derive(Clone)]
pub struct GeminiGenerator {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiGenerator {
    pub fn new(
        http_client: HttpClient,
        api_key: String,
        api_url: String,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            api_key,
            api_url,
            model,
            timeout,
        }
    }

    fn user_prompt(movie: &Movie, keywords: &[String]) -> String {
        let year = movie
            .year()
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown year".to_string());

        format!(
            "**Liked Movie:**\n`{} ({})`\n\n**Full Keyword List:**\n`{}`\n\n\
             **Liked Keywords (Focus on these for recommendations):**\n`{}`",
            movie.title,
            year,
            movie.ai_keywords.join(", "),
            keywords.join(", ")
        )
    }

    async fn call(&self, movie: &Movie, keywords: &[String]) -> AppResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_url.trim_end_matches('/'),
            self.model
        );
        let prompt = Self::user_prompt(movie, keywords);
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: SYSTEM_PROMPT }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "Gemini API returned status {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            AppError::MalformedUpstream(format!("Unexpected Gemini response: {}", e))
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        tracing::info!(
            movie_id = movie.id,
            model = %self.model,
            output_chars = text.len(),
            "Generation completed"
        );

        Ok(text)
    }
}

#[async_trait]
impl RecommendationGenerator for GeminiGenerator {
    async fn generate(&self, movie: &Movie, keywords: &[String]) -> AppResult<String> {
        with_timeout(self.timeout, "generation call", self.call(movie, keywords)).await
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::movie::sample_movie;

    #[test]
    fn test_user_prompt_mentions_movie_and_keywords() {
        let movie = sample_movie(42, "Inception", &["heist", "dreams"]);
        let prompt = GeminiGenerator::user_prompt(&movie, &["heist".to_string()]);
        assert!(prompt.contains("`Inception (2010)`"));
        assert!(prompt.contains("`heist, dreams`"));
        assert!(prompt.ends_with("`heist`"));
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "sys" }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig { temperature: 0.25 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["temperature"], 0.25);
    }

    #[test]
    fn test_response_text_parts_joined() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "```json\n"}, {"text": "[]\n```"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        assert_eq!(text, "```json\n[]\n```");
    }
}
