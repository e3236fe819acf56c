//! Provider→factory registry for constructing backend handles.
//!
//! The control plane never matches on provider strings; each provider ships
//! a [`BackendFactory`] and registers it here. Registering a model whose
//! provider has no factory is a configuration error caught up front.

use crate::{MockBackend, OpenAiCompatBackend};
use conflux_abstraction::{Backend, BackendError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backend-specific configuration carried by a registry entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// The provider name (e.g., "mock", "openai-compatible").
    pub provider: String,
    /// The model ID the backend should serve (e.g., "llama-3-70b").
    pub model: String,
    /// Optional base URL for HTTP providers.
    pub base_url: Option<String>,
    /// Optional API key (absent for local servers without auth).
    pub api_key: Option<String>,
    /// Opaque provider-specific extras, passed through untouched.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl BackendSettings {
    /// Creates settings for the given provider and model.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            api_key: None,
            extra: serde_json::Value::Null,
        }
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Constructs backend handles for one provider.
pub trait BackendFactory: Send + Sync {
    /// The provider name this factory serves.
    fn provider(&self) -> &str;

    /// Creates a backend handle from the given settings.
    ///
    /// # Errors
    /// Returns a `BackendError` if the settings are incomplete or the handle
    /// cannot be constructed.
    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn Backend>, BackendError>;
}

/// Factory for the mock provider.
#[derive(Debug, Default)]
pub struct MockFactory;

impl BackendFactory for MockFactory {
    fn provider(&self) -> &str {
        "mock"
    }

    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn Backend>, BackendError> {
        let mut backend = MockBackend::new(settings.model.clone());
        // Test hooks carried through the opaque extras: scripted failure and
        // artificial latency.
        if let Some(message) = settings.extra.get("fail").and_then(|value| value.as_str()) {
            backend = backend.with_failure(message);
        }
        if let Some(latency_ms) = settings.extra.get("latency_ms").and_then(|value| value.as_u64())
        {
            backend = backend.with_latency(Duration::from_millis(latency_ms));
        }
        Ok(Arc::new(backend))
    }
}

/// Factory for OpenAI-compatible HTTP providers.
#[derive(Debug, Default)]
pub struct OpenAiCompatFactory;

impl BackendFactory for OpenAiCompatFactory {
    fn provider(&self) -> &str {
        "openai-compatible"
    }

    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn Backend>, BackendError> {
        let base_url = settings.base_url.clone().ok_or_else(|| {
            BackendError::Request(
                "base_url is required for the openai-compatible provider".to_string(),
            )
        })?;

        let backend = match settings.api_key.clone() {
            Some(api_key) => {
                OpenAiCompatBackend::with_api_key(settings.model.clone(), base_url, api_key)
            }
            None => OpenAiCompatBackend::without_auth(settings.model.clone(), base_url),
        };
        Ok(Arc::new(backend))
    }
}

/// Registry mapping provider names to backend factories.
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl FactoryRegistry {
    /// Creates an empty factory registry.
    #[must_use]
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Creates a registry pre-populated with the built-in providers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MockFactory));
        registry.register(Arc::new(OpenAiCompatFactory));
        registry
    }

    /// Registers a factory, replacing any existing factory for the provider.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        debug!(provider = factory.provider(), "Registering backend factory");
        self.factories.insert(factory.provider().to_string(), factory);
    }

    /// Returns whether a factory exists for the given provider.
    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    /// Lists the registered provider names, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.factories.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Creates a backend handle through the factory for `settings.provider`.
    ///
    /// # Errors
    /// Returns a `BackendError` if no factory is registered for the provider
    /// or the factory fails to construct the handle.
    pub fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn Backend>, BackendError> {
        let factory = self.factories.get(&settings.provider).ok_or_else(|| {
            BackendError::Request(format!(
                "No backend factory registered for provider '{}'",
                settings.provider
            ))
        })?;
        factory.create(settings)
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
