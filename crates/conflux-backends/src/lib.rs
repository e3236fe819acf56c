//! Backend implementations for Conflux.
//!
//! This crate provides concrete implementations of the `Backend` trait and
//! the provider→factory registry through which the control plane constructs
//! backend handles.
//!
//! # Supported Providers
//!
//! - **mock**: Testing and development
//! - **openai-compatible**: Any server implementing the OpenAI API shape
//!   (vLLM, LocalAI, LM Studio, Ollama, hosted OpenAI-style gateways)
//!
//! Additional providers register their own [`BackendFactory`] on a
//! [`FactoryRegistry`] without touching registry or router code.

pub mod factory;
pub mod openai_compat;

use async_trait::async_trait;
use conflux_abstraction::{
    Backend, BackendError, ChatMessage, ChunkHandler, CompletionParameters, CompletionResponse,
    EmbeddingParameters, UsageStats,
};
use std::time::Duration;
use tracing::debug;

pub use factory::{BackendFactory, BackendSettings, FactoryRegistry};
pub use openai_compat::OpenAiCompatBackend;

/// A mock implementation of the `Backend` trait for testing and demonstration.
///
/// Responses are deterministic functions of the input. A scripted failure or
/// artificial latency can be attached for exercising failover and timeout
/// paths in tests.
#[derive(Debug, Default)]
pub struct MockBackend {
    id: String,
    fail_with: Option<String>,
    latency: Option<Duration>,
}

impl MockBackend {
    /// Creates a new `MockBackend` with the given model ID.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, fail_with: None, latency: None }
    }

    /// Makes every invocation fail with the given message.
    #[must_use]
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Adds artificial latency before every response.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate(&self) -> Result<(), BackendError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(ref message) = self.fail_with {
            return Err(BackendError::Response(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError> {
        self.simulate().await?;

        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockBackend generating chat completion"
        );

        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let response_content = format!("Mock response from {}: {last}", self.id);

        let prompt_tokens = messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
        let completion_tokens = count_tokens(&response_content);
        let total_tokens = prompt_tokens + completion_tokens;

        Ok(CompletionResponse {
            content: response_content,
            model_id: Some(self.id.clone()),
            usage: Some(UsageStats { prompt_tokens, completion_tokens, total_tokens }),
        })
    }

    async fn stream_chat_completion(
        &self,
        messages: &[ChatMessage],
        mut on_chunk: ChunkHandler<'_>,
        parameters: Option<CompletionParameters>,
    ) -> Result<CompletionResponse, BackendError> {
        let response = self.chat_completion(messages, parameters).await?;
        for word in response.content.split_inclusive(' ') {
            on_chunk(word);
        }
        Ok(response)
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
        _parameters: Option<EmbeddingParameters>,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        self.simulate().await?;

        debug!(model_id = %self.id, text_count = texts.len(), "MockBackend generating embeddings");

        // Deterministic pseudo-embedding: byte-sum folded into 8 dimensions.
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; 8];
                for (i, byte) in text.bytes().enumerate() {
                    vector[i % 8] += f32::from(byte) / 255.0;
                }
                vector
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
///
/// For a real implementation, this would use a proper tokenizer.
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
