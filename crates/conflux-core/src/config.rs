//! TOML configuration for the control plane.
//!
//! One file declares the cache/health/router settings and the initial model
//! catalog. Every section has serde defaults, so an empty document is a
//! valid configuration.

use crate::cache::CacheConfig;
use crate::health::HealthMonitorConfig;
use crate::registry::entry::{
    CapabilitySet, CostProfile, LatencyProfile, Location, PrivacyFlags, RegistryEntry,
};
use crate::routing::{RouterConfig, TaskKind};
use conflux_backends::BackendSettings;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config is structurally valid but semantically wrong.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level control-plane configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Entry id used by `resolve(None)`.
    pub default_model: Option<String>,
    /// Entry id tried when the resolved entry is unavailable.
    pub fallback_model: Option<String>,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Health monitor settings.
    pub health: HealthMonitorConfig,
    /// Router preferences.
    pub router: RouterConfig,
    /// Models registered at construction time.
    pub models: Vec<ModelEntryConfig>,
}

impl ControlPlaneConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns `ConfigError` on parse failure, duplicate model ids, or
    /// invalid cache settings.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ControlPlaneConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O failure or any `from_toml_str` error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading control plane config");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate model id '{}'", model.id)));
            }
        }
        self.cache
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// One model declaration in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntryConfig {
    /// Unique entry id.
    pub id: String,
    /// Provider name; must match a registered backend factory.
    pub provider: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Backend model id; defaults to the entry id.
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for HTTP providers.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key for authenticated providers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Capability flags; an empty set defaults to reasoning-only.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Where the backend runs.
    #[serde(default)]
    pub location: Option<Location>,
    /// Maximum context window, in tokens.
    #[serde(default)]
    pub max_context_length: Option<u32>,
    /// Maximum output length, in tokens.
    #[serde(default)]
    pub max_output_length: Option<u32>,
    /// Selection priority; lower is preferred.
    #[serde(default)]
    pub priority: Option<u32>,
    /// Ordered fallback entry ids.
    #[serde(default)]
    pub fallback_to: Vec<String>,
    /// Declared task-kind affinities.
    #[serde(default)]
    pub preferred_for: Vec<TaskKind>,
    /// Per-token pricing.
    #[serde(default)]
    pub cost: CostProfile,
    /// Advisory latency percentiles.
    #[serde(default)]
    pub latency: LatencyProfile,
    /// Disabled entries are never selected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the entry works without network access.
    #[serde(default)]
    pub offline_capable: bool,
    /// Privacy posture.
    #[serde(default)]
    pub privacy: PrivacyFlags,
    /// Optional health-check URL.
    #[serde(default)]
    pub health_check: Option<String>,
    /// Opaque provider-specific extras.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl ModelEntryConfig {
    /// Converts the declaration into a registry entry.
    #[must_use]
    pub fn into_entry(self) -> RegistryEntry {
        let mut settings =
            BackendSettings::new(self.provider.clone(), self.model.unwrap_or_else(|| self.id.clone()));
        settings.base_url = self.base_url;
        settings.api_key = self.api_key;
        settings.extra = self.extra;

        let capabilities = if self.capabilities == CapabilitySet::default() {
            CapabilitySet::reasoning()
        } else {
            self.capabilities
        };

        let mut entry = RegistryEntry::new(self.id, self.provider, settings)
            .with_capabilities(capabilities)
            .with_fallback_to(self.fallback_to)
            .with_preferred_for(self.preferred_for)
            .with_privacy(self.privacy)
            .with_offline_capable(self.offline_capable)
            .with_enabled(self.enabled);
        if let Some(name) = self.name {
            entry.name = name;
        }
        if let Some(version) = self.version {
            entry = entry.with_version(version);
        }
        if let Some(location) = self.location {
            entry = entry.with_location(location);
        }
        if let Some(max_context_length) = self.max_context_length {
            entry = entry.with_max_context_length(max_context_length);
        }
        if let Some(max_output_length) = self.max_output_length {
            entry.max_output_length = max_output_length;
        }
        if let Some(priority) = self.priority {
            entry = entry.with_priority(priority);
        }
        entry.cost = self.cost;
        entry.latency = self.latency;
        if let Some(health_check) = self.health_check {
            entry = entry.with_health_check(health_check);
        }
        entry
    }
}
