//! Gemini API Client
//!
//! Sends a screenshot plus the fixed description prompt to Google's
//! `generateContent` endpoint and returns the generated text.
//! No retry, rate limiting or caching: one request per screenshot.

use super::http_client::build_client;
use super::prompts::DESCRIBE_PROMPT;
use super::{Describer, ImagePayload};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Gemini client
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key for Google AI Studio
    pub api_key: String,

    /// Base URL for API (default: https://generativelanguage.googleapis.com)
    pub base_url: String,

    /// Model to use (default: gemini-1.5-flash)
    pub model: String,

    /// Transport timeout per request
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> PipelineResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(PipelineError::Config("Gemini API key is empty".to_string()));
        }

        let client = build_client(config.timeout)?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Extract the text of the first candidate
    fn parse_response(response: GenerateContentResponse) -> PipelineResult<String> {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(PipelineError::Inference(format!("prompt blocked: {}", reason)));
        }

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Inference("model returned no text".to_string()));
        }

        Ok(text.to_string())
    }
}

#[async_trait]
impl Describer for GeminiClient {
    async fn describe(&self, image: &ImagePayload) -> PipelineResult<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: DESCRIBE_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        };

        tracing::debug!(
            "[Gemini] Describing {} bytes of {} with {}",
            image.bytes.len(),
            image.mime_type,
            self.config.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Inference(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&error_text) {
                return Err(PipelineError::Inference(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(PipelineError::Inference(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Inference(format!("failed to parse response: {}", e)))?;

        Self::parse_response(body)
    }
}

// API request/response types

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// API error response
#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}
