//! Chat completion collaborator.
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};

use super::prompt::ChatMessage;
use crate::config::LlmConfig;
use crate::error::{RagError, Result};

const SERVICE: &str = "completion";

/// Opaque text completion: messages in, free text out.
///
/// Calls are not assumed idempotent and are never retried here.
pub trait CompletionService: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    fn model(&self) -> &str;
}

/// Blocking client for OpenAI-compatible `chat/completions` endpoints.
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(RagError::config("missing completion endpoint"));
        }
        if api_key.trim().is_empty() {
            return Err(RagError::config("missing completion API key"));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| RagError::config("invalid completion API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::config(format!("failed to build completion HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| RagError::config("llm.endpoint is not set (LLM_ENDPOINT)"))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::config("llm.api_key is not set (LLM_API_KEY)"))?;
        Self::new(
            endpoint,
            api_key,
            &config.model,
            config.temperature,
            config.max_tokens,
            config.timeout(),
        )
    }
}

fn first_choice(response: CompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RagError::upstream(SERVICE, None, "response contained no choices"))
}

impl CompletionService for ChatCompletionClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| {
                let reason = if e.is_timeout() { "timed out" } else { "transport error" };
                RagError::upstream(SERVICE, None, format!("{reason}: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let excerpt: String = body.chars().take(512).collect();
            return Err(RagError::upstream(SERVICE, Some(status.as_u16()), excerpt));
        }

        let parsed: CompletionResponse = resp
            .json()
            .map_err(|e| RagError::upstream(SERVICE, None, format!("malformed response: {e}")))?;
        first_choice(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
