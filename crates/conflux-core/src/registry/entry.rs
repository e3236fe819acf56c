//! Data model for registered backend entries.

use crate::routing::TaskKind;
use chrono::{DateTime, Utc};
use conflux_backends::BackendSettings;
use serde::{Deserialize, Serialize};

/// Capability flags advertised by a backend entry.
///
/// A candidate satisfies a requirement set when every flag set in the
/// requirement is also set on the candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySet {
    /// General reasoning / text generation.
    pub reasoning: bool,
    /// Mixed-modality inputs (images alongside text, etc.).
    pub multimodal: bool,
    /// Image understanding.
    pub vision: bool,
    /// Audio understanding.
    pub audio: bool,
    /// Embedding generation.
    pub embeddings: bool,
    /// Structured function/tool calling.
    pub function_calling: bool,
}

impl CapabilitySet {
    /// A set with only the reasoning flag.
    #[must_use]
    pub fn reasoning() -> Self {
        Self { reasoning: true, ..Self::default() }
    }

    /// Returns whether this set satisfies every flag in `required`.
    #[must_use]
    pub fn satisfies(&self, required: &CapabilitySet) -> bool {
        (!required.reasoning || self.reasoning)
            && (!required.multimodal || self.multimodal)
            && (!required.vision || self.vision)
            && (!required.audio || self.audio)
            && (!required.embeddings || self.embeddings)
            && (!required.function_calling || self.function_calling)
    }

    /// Returns the union of this set and `other`.
    #[must_use]
    pub fn union(&self, other: &CapabilitySet) -> Self {
        Self {
            reasoning: self.reasoning || other.reasoning,
            multimodal: self.multimodal || other.multimodal,
            vision: self.vision || other.vision,
            audio: self.audio || other.audio,
            embeddings: self.embeddings || other.embeddings,
            function_calling: self.function_calling || other.function_calling,
        }
    }
}

/// Where a backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// Hosted by a remote provider.
    Cloud,
    /// Running on the local machine.
    Local,
    /// Running on nearby edge hardware.
    Edge,
}

/// Per-token pricing for an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostProfile {
    /// Price per input token, in USD.
    pub input_per_token: f64,
    /// Price per output token, in USD.
    pub output_per_token: f64,
}

impl CostProfile {
    /// Average of input and output per-token prices.
    #[must_use]
    pub fn average(&self) -> f64 {
        (self.input_per_token + self.output_per_token) / 2.0
    }
}

/// Advisory latency percentiles for an entry, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyProfile {
    /// Median latency.
    pub p50_ms: f64,
    /// 95th percentile latency.
    pub p95_ms: f64,
    /// 99th percentile latency.
    pub p99_ms: f64,
}

/// Privacy posture flags for an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyFlags {
    /// The provider retains no request data.
    pub zero_retention: bool,
    /// Compliance regimes the provider attests to (e.g., "gdpr", "hipaa").
    pub compliance: Vec<String>,
}

/// Live health classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Reachable with acceptable latency.
    Healthy,
    /// Reachable but slow.
    Degraded,
    /// Unreachable or erroring.
    Down,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Down => write!(f, "down"),
        }
    }
}

/// Health snapshot for an entry. Written by the health monitor, read by the
/// registry and router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current classification.
    pub state: HealthState,
    /// Last measured probe latency, in milliseconds.
    pub latency_ms: f64,
    /// Error rate observed by the last probe (0.0 - 1.0).
    pub error_rate: f64,
    /// When the last probe ran.
    pub last_check: DateTime<Utc>,
    /// Observed uptime percentage.
    pub uptime: f64,
}

impl HealthStatus {
    /// The status a fresh registration starts with.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            state: HealthState::Healthy,
            latency_ms: 0.0,
            error_rate: 0.0,
            last_check: Utc::now(),
            uptime: 100.0,
        }
    }

    /// Whether the entry can be resolved at all (anything but `Down`).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state != HealthState::Down
    }

    /// Whether the entry is fully healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

/// Partial health update merged into an entry's `HealthStatus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    /// New classification, if changed.
    pub state: Option<HealthState>,
    /// New probe latency, if measured.
    pub latency_ms: Option<f64>,
    /// New error rate, if measured.
    pub error_rate: Option<f64>,
    /// New uptime percentage, if recomputed.
    pub uptime: Option<f64>,
}

impl HealthUpdate {
    /// An update that only changes the classification.
    #[must_use]
    pub fn state(state: HealthState) -> Self {
        Self { state: Some(state), ..Self::default() }
    }
}

/// One per-invocation cost record. Append-only; the registry retains the
/// last 1000 per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMetric {
    /// The entry id the invocation ran against.
    pub model: String,
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    pub completion_tokens: u64,
    /// Computed cost in USD.
    pub cost: f64,
    /// Wall-clock latency of the invocation, in milliseconds.
    pub latency_ms: u64,
    /// When the invocation completed.
    pub timestamp: DateTime<Utc>,
}

/// A recorded version pin. Recorded but not consulted by resolution or
/// routing; enforcement semantics are intentionally left undefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPin {
    /// The pinned version string.
    pub version: String,
    /// When the pin was recorded.
    pub pinned_at: DateTime<Utc>,
}

/// A recorded update policy. Recorded but not consulted, like [`VersionPin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Updates applied only by explicit operator action.
    Manual,
    /// Updates applied automatically.
    Automatic,
    /// Operator notified, updates not applied.
    Notify,
}

/// A registered backend entry: identity, capabilities, placement, pricing,
/// and the opaque settings its factory needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Unique entry id (e.g., "gpt-4o", "local-llama").
    pub id: String,
    /// Provider name; must match a registered backend factory.
    pub provider: String,
    /// Human-readable display name.
    pub name: String,
    /// Version string, advisory.
    pub version: String,
    /// Capability flags.
    pub capabilities: CapabilitySet,
    /// Where the backend runs.
    pub location: Location,
    /// Maximum context window, in tokens.
    pub max_context_length: u32,
    /// Maximum output length, in tokens.
    pub max_output_length: u32,
    /// Selection priority; lower is preferred.
    pub priority: u32,
    /// Ordered entry ids to try when this entry is unavailable.
    #[serde(default)]
    pub fallback_to: Vec<String>,
    /// Task kinds this entry has declared affinity for.
    #[serde(default)]
    pub preferred_for: Vec<TaskKind>,
    /// Per-token pricing.
    #[serde(default)]
    pub cost: CostProfile,
    /// Advisory latency percentiles.
    #[serde(default)]
    pub latency: LatencyProfile,
    /// Disabled entries are never selected.
    pub enabled: bool,
    /// Whether the entry works without network access.
    pub offline_capable: bool,
    /// Privacy posture.
    #[serde(default)]
    pub privacy: PrivacyFlags,
    /// Optional health-check URL probed by the monitor.
    #[serde(default)]
    pub health_check: Option<String>,
    /// Opaque backend-specific settings handed to the factory.
    pub settings: BackendSettings,
}

impl RegistryEntry {
    /// Creates an entry with the given identity and settings.
    ///
    /// Defaults: enabled, cloud location, priority 10, reasoning-only
    /// capabilities, 8192-token context. The settings' provider field is
    /// forced to `provider` so the factory lookup has a single source of
    /// truth.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        mut settings: BackendSettings,
    ) -> Self {
        let id = id.into();
        let provider = provider.into();
        settings.provider.clone_from(&provider);
        Self {
            name: id.clone(),
            id,
            provider,
            version: "latest".to_string(),
            capabilities: CapabilitySet::reasoning(),
            location: Location::Cloud,
            max_context_length: 8192,
            max_output_length: 4096,
            priority: 10,
            fallback_to: Vec::new(),
            preferred_for: Vec::new(),
            cost: CostProfile::default(),
            latency: LatencyProfile::default(),
            enabled: true,
            offline_capable: false,
            privacy: PrivacyFlags::default(),
            health_check: None,
            settings,
        }
    }

    /// Sets the capability flags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Sets the selection priority (lower = preferred).
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the per-token pricing.
    #[must_use]
    pub fn with_cost(mut self, input_per_token: f64, output_per_token: f64) -> Self {
        self.cost = CostProfile { input_per_token, output_per_token };
        self
    }

    /// Sets the advisory latency percentiles.
    #[must_use]
    pub fn with_latency(mut self, p50_ms: f64, p95_ms: f64, p99_ms: f64) -> Self {
        self.latency = LatencyProfile { p50_ms, p95_ms, p99_ms };
        self
    }

    /// Sets the ordered fallback entry ids.
    #[must_use]
    pub fn with_fallback_to(mut self, fallback_to: Vec<String>) -> Self {
        self.fallback_to = fallback_to;
        self
    }

    /// Declares task-kind affinities.
    #[must_use]
    pub fn with_preferred_for(mut self, preferred_for: Vec<TaskKind>) -> Self {
        self.preferred_for = preferred_for;
        self
    }

    /// Sets the maximum context window.
    #[must_use]
    pub fn with_max_context_length(mut self, max_context_length: u32) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    /// Marks the entry as offline capable.
    #[must_use]
    pub fn with_offline_capable(mut self, offline_capable: bool) -> Self {
        self.offline_capable = offline_capable;
        self
    }

    /// Sets the health-check URL.
    #[must_use]
    pub fn with_health_check(mut self, url: impl Into<String>) -> Self {
        self.health_check = Some(url.into());
        self
    }

    /// Sets the privacy posture.
    #[must_use]
    pub fn with_privacy(mut self, privacy: PrivacyFlags) -> Self {
        self.privacy = privacy;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the version string.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_satisfies() {
        let full = CapabilitySet {
            reasoning: true,
            vision: true,
            multimodal: true,
            ..CapabilitySet::default()
        };
        let vision_req = CapabilitySet {
            vision: true,
            multimodal: true,
            ..CapabilitySet::default()
        };
        assert!(full.satisfies(&vision_req));
        assert!(!CapabilitySet::reasoning().satisfies(&vision_req));
        assert!(full.satisfies(&CapabilitySet::default()));
    }

    #[test]
    fn test_capability_union() {
        let a = CapabilitySet { reasoning: true, ..CapabilitySet::default() };
        let b = CapabilitySet { embeddings: true, ..CapabilitySet::default() };
        let merged = a.union(&b);
        assert!(merged.reasoning && merged.embeddings);
        assert!(!merged.vision);
    }

    #[test]
    fn test_fresh_health_is_healthy() {
        let status = HealthStatus::initial();
        assert_eq!(status.state, HealthState::Healthy);
        assert!(status.is_available());
        assert!(status.is_healthy());
    }

    #[test]
    fn test_entry_defaults() {
        let entry = RegistryEntry::new("m1", "mock", conflux_backends::BackendSettings::new("", "m1"));
        assert!(entry.enabled);
        assert_eq!(entry.priority, 10);
        assert_eq!(entry.settings.provider, "mock");
        assert!(entry.capabilities.reasoning);
    }

    #[test]
    fn test_cost_profile_average() {
        let cost = CostProfile { input_per_token: 0.001, output_per_token: 0.003 };
        assert!((cost.average() - 0.002).abs() < f64::EPSILON);
    }
}
