//! Language model collaborator.
//!
//! Everything that needs text generation goes through [`LanguageModel`], so
//! tests can script responses. [`GeminiClient`] talks to the Vertex AI
//! `generateContent` endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SqlPilotConfig;
use crate::error::{Result, SqlPilotError};

/// Prompt in, text out. One call per invocation; retries are the caller's
/// business.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logging.
    fn name(&self) -> &str;
}

/// Vertex AI Gemini client.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    access_token: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        access_token: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            access_token: access_token.into(),
            temperature,
        })
    }

    /// Build from config, reading the access token from the environment
    /// variable named by `model.access_token_env`.
    pub fn from_config(config: &SqlPilotConfig) -> Result<Self> {
        let token_var = &config.model.access_token_env;
        let access_token = std::env::var(token_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                SqlPilotError::Model(format!("access token variable {token_var} is not set"))
            })?;
        let endpoint = match &config.model.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => vertex_endpoint(
                &config.warehouse.project_id,
                config.model_location(),
                &config.model.name,
            ),
        };
        tracing::info!(
            model = %config.model.name,
            location = %config.model_location(),
            temperature = config.model.temperature,
            "configured Gemini client"
        );
        Self::new(
            endpoint,
            config.model.name.clone(),
            access_token,
            config.model.temperature,
            Duration::from_millis(config.model.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `generateContent` URL for a publisher model in a Vertex AI location.
pub fn vertex_endpoint(project: &str, location: &str, model: &str) -> String {
    format!(
        "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent"
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "calling model");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SqlPilotError::Model(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(model = %self.model, status = %status, "model call rejected");
            return Err(SqlPilotError::Model(format!(
                "model returned {status}: {}",
                detail.trim()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SqlPilotError::Model(format!("failed to parse model response: {e}")))?;
        let text = parsed
            .into_text()
            .ok_or_else(|| SqlPilotError::Model("model returned no candidates".to_string()))?;

        tracing::debug!(
            model = %self.model,
            response_len = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model responded"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_vertex_endpoint() {
        assert_eq!(
            vertex_endpoint("vertex-ai-462816", "us-central1", "gemini-2.0-flash-001"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/vertex-ai-462816/locations/us-central1/publishers/google/models/gemini-2.0-flash-001:generateContent"
        );
    }

    #[test]
    fn reads_first_candidate_text() {
        let json = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"SELECT "},{"text":"1"}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn empty_candidates_have_no_text() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(parsed.into_text(), None);
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.into_text(), None);
    }

    #[test]
    fn request_uses_camel_case_generation_config() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: GenerationConfig { temperature: 0.1 },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("generationConfig").is_some());
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }
}
