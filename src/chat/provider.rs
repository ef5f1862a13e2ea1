//! Completion provider seam.
//!
//! Handlers only see `CompletionProvider`; production wires in the Gemini
//! REST client, tests wire in a fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("completion provider is not configured: {0}")]
    NotConfigured(String),

    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("completion API returned no text")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Generates the next model turn for a full conversation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError>;
}

// ─── Gemini generateContent client ───────────────────────────────

pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

impl GeminiProvider {
    pub fn new(config: &AppConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()?;

        debug!(
            model = %config.gemini_model,
            base_url = %config.gemini_base_url,
            "completion provider initialised"
        );

        Ok(Self {
            http,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            api_key: config.gemini_api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

fn request_body(turns: &[Turn]) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: turns
            .iter()
            .map(|t| Content {
                role: t.role,
                parts: [Part { text: &t.text }],
            })
            .collect(),
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))?;

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&request_body(turns))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        parsed.into_text().ok_or(ProviderError::EmptyResponse)
    }
}
