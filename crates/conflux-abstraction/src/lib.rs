//! Backend abstraction layer for Conflux.
//!
//! This crate defines the uniform capability contract every backend model
//! service implements, plus the request/response types shared across the
//! control plane. The core crates never talk to a concrete provider; they
//! talk to `dyn Backend`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when invoking a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// An error occurred during the API request (e.g., network issues, invalid request).
    #[error("Request Error: {0}")]
    Request(String),

    /// The backend returned an error response (e.g., invalid input, server error).
    #[error("Backend Response Error: {0}")]
    Response(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// The backend does not implement the requested operation.
    #[error("Operation '{operation}' is not supported by backend '{model}'")]
    UnsupportedOperation {
        /// The operation that was requested (e.g., "embeddings").
        operation: String,
        /// The backend's model identifier.
        model: String,
    },

    /// Provider quota exceeded or rate limit hit (hard stop error).
    #[error("Provider '{provider}' quota exceeded")]
    QuotaExceeded {
        /// The provider name (e.g., "openai-compatible").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Other unexpected errors.
    #[error("Other Backend Error: {0}")]
    Other(String),
}

/// Represents a message in a conversation with a chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a user-role message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    /// Creates an assistant-role message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }

    /// Creates a system-role message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Parameters for controlling a backend's generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParameters {
    /// Sampling temperature, between 0 and 2. Higher values mean more risk.
    pub temperature: Option<f32>,

    /// Nucleus sampling: the model considers tokens with `top_p` probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate in the completion.
    pub max_tokens: Option<u32>,

    /// Up to 4 sequences where the backend will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for CompletionParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            max_tokens: Some(512),
            stop_sequences: None,
        }
    }
}

/// Options for embedding generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingParameters {
    /// Optional requested output dimensionality.
    pub dimensions: Option<u32>,
}

/// The response from a chat or multimodal completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model that generated the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<UsageStats>,
}

/// Token usage statistics for a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// Callback invoked with each streamed content chunk.
pub type ChunkHandler<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// The uniform capability contract implemented by every backend service.
///
/// Only `chat_completion` and `model_id` are required. Streaming,
/// embeddings, and multimodal completion are optional capabilities: the
/// defaults report `UnsupportedOperation` (or delegate, for multimodal), and
/// capability-aware callers consult the registry before dispatching.
///
/// All backends must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Generates a chat completion for the given conversation history.
    ///
    /// # Errors
    /// Returns a `BackendError` if generation fails.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError>;

    /// Streams a chat completion, invoking `on_chunk` for each content chunk.
    ///
    /// The full response is still returned once the stream completes.
    ///
    /// # Errors
    /// Returns `BackendError::UnsupportedOperation` unless the backend
    /// overrides this method.
    async fn stream_chat_completion(
        &self,
        _messages: &[ChatMessage],
        _on_chunk: ChunkHandler<'_>,
        _parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError> {
        Err(BackendError::UnsupportedOperation {
            operation: "streaming".to_string(),
            model: self.model_id().to_string(),
        })
    }

    /// Generates embedding vectors for the given texts.
    ///
    /// # Errors
    /// Returns `BackendError::UnsupportedOperation` unless the backend
    /// overrides this method.
    async fn generate_embeddings(
        &self,
        _texts: &[String],
        _parameters: Option<EmbeddingParameters>,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        Err(BackendError::UnsupportedOperation {
            operation: "embeddings".to_string(),
            model: self.model_id().to_string(),
        })
    }

    /// Generates a completion for a multimodal request (vision, audio).
    ///
    /// The default delegates to `chat_completion`; backends with dedicated
    /// multimodal endpoints override this.
    ///
    /// # Errors
    /// Returns a `BackendError` if generation fails.
    async fn multimodal_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError> {
        self.chat_completion(messages, parameters).await
    }

    /// Returns the ID of the model behind this backend handle.
    fn model_id(&self) -> &str;
}
