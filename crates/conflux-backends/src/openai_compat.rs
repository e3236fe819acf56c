//! OpenAI-compatible backend implementation.
//!
//! This module provides an implementation of the `Backend` trait for any
//! server that implements the OpenAI Chat Completions API specification:
//!
//! - **vLLM**: High-performance LLM inference server
//! - **LocalAI**: Local inference server with OpenAI-compatible API
//! - **LM Studio**: Desktop app for running local models
//! - **Ollama**: Local model runner with OpenAI-compatible endpoints
//! - **Any OpenAI-compatible server or gateway**
//!
//! # Constructor Patterns
//!
//! - `with_api_key()` - Explicit API key for authenticated servers
//! - `without_auth()` - No authentication (most common for local servers)

use async_trait::async_trait;
use conflux_abstraction::{
    Backend, BackendError, ChatMessage, CompletionParameters, CompletionResponse,
    EmbeddingParameters, UsageStats,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// OpenAI-compatible backend implementation.
///
/// Connects to any server implementing the OpenAI Chat Completions API,
/// enabling support for local models and self-hosted inference servers.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    /// The model identifier (e.g., "llama-3-70b", "mistral-7b").
    model_id: String,
    /// Base URL for the API endpoint (e.g., "http://localhost:8000/v1").
    base_url: String,
    /// Optional API key (some local servers don't require auth).
    api_key: Option<String>,
    /// HTTP client for requests.
    client: Client,
}

impl OpenAiCompatBackend {
    /// Creates a new backend with an explicit API key.
    ///
    /// # Arguments
    /// * `model_id` - The model identifier
    /// * `base_url` - The base URL for the API endpoint
    /// * `api_key` - The API key for authentication
    #[must_use]
    pub fn with_api_key(model_id: String, base_url: String, api_key: String) -> Self {
        Self {
            model_id,
            base_url,
            api_key: Some(api_key),
            client: Self::build_client(),
        }
    }

    /// Creates a new backend without authentication.
    ///
    /// Use this constructor for local servers that don't require API keys,
    /// such as LM Studio or local vLLM instances.
    ///
    /// # Arguments
    /// * `model_id` - The model identifier
    /// * `base_url` - The base URL for the API endpoint
    #[must_use]
    pub fn without_auth(model_id: String, base_url: String) -> Self {
        Self { model_id, base_url, api_key: None, client: Self::build_client() }
    }

    fn build_client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref api_key) => request.bearer_auth(api_key),
            None => request,
        }
    }

    /// Maps a non-success HTTP status and body to the backend error taxonomy.
    fn map_error_status(status: reqwest::StatusCode, error_text: String) -> BackendError {
        // Authentication errors
        if status == 401 || status == 403 {
            return BackendError::Request(format!(
                "Authentication failed ({}): {}",
                status, error_text
            ));
        }

        // Quota / rate limit errors
        if status == 402 || status == 429 {
            return BackendError::QuotaExceeded {
                provider: "openai-compatible".to_string(),
                message: Some(error_text),
            };
        }

        // Server errors
        if (500..=599).contains(&status.as_u16()) {
            return BackendError::Response(format!("Server error ({}): {}", status, error_text));
        }

        BackendError::Response(format!("API error ({}): {}", status, error_text))
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "OpenAiCompatBackend generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);

        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|msg| WireMessage { role: msg.role.clone(), content: msg.content.clone() })
            .collect();

        let mut request_body = ChatRequest {
            model: self.model_id.clone(),
            messages: wire_messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let request = self.authorize(self.client.post(&url).json(&request_body));

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request to OpenAI-compatible API");
            BackendError::Request(format!("Network error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                url = %url,
                "OpenAI-compatible API returned error status"
            );
            return Err(Self::map_error_status(status, error_text));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to parse OpenAI-compatible API response");
            BackendError::Serialization(format!("Failed to parse response: {}", e))
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                BackendError::Response("API response contained no choices".to_string())
            })?;

        Ok(CompletionResponse {
            content,
            model_id: Some(self.model_id.clone()),
            usage: chat_response.usage.map(|u| UsageStats {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
        parameters: Option<EmbeddingParameters>,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        debug!(
            model_id = %self.model_id,
            text_count = texts.len(),
            "OpenAiCompatBackend generating embeddings"
        );

        let url = format!("{}/embeddings", self.base_url);

        let request_body = EmbeddingRequest {
            model: self.model_id.clone(),
            input: texts.to_vec(),
            dimensions: parameters.and_then(|p| p.dimensions),
        };

        let request = self.authorize(self.client.post(&url).json(&request_body));

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send embeddings request");
            BackendError::Request(format!("Network error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, url = %url, "Embeddings request failed");
            return Err(Self::map_error_status(status, error_text));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            BackendError::Serialization(format!("Failed to parse embeddings response: {}", e))
        })?;

        // The API may return vectors out of order; sort by index.
        let mut data = embedding_response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Wire types for the OpenAI-compatible API.

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
