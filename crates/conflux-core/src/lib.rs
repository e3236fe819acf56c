//! Conflux core: a single-process control plane that routes AI-completion
//! tasks to interchangeable backend model services.
//!
//! The hard part is the decision layer, not the backend clients:
//! capability-matched candidate selection, health-aware failover,
//! cost/speed-optimized scoring, multi-level response caching,
//! dependency-ordered pipeline execution, and bounded-memory multi-agent
//! coordination. Backends stay behind the `conflux-abstraction` contract and
//! plug in through `conflux-backends` factories.
//!
//! Entry point: [`ControlPlane`], an explicitly constructed façade over an
//! owned [`ModelRegistry`], [`TaskRouter`], [`ResponseCache`],
//! [`HealthMonitor`], [`PipelineExecutor`], and [`AgentCoordinator`].

pub mod agents;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod routing;

pub use agents::{AgentAssignment, AgentCoordinator, AgentRunResult, CoordinationOutcome};
pub use cache::{CacheConfig, CacheKeyParts, CacheStats, ResponseCache};
pub use config::{ConfigError, ControlPlaneConfig, ModelEntryConfig};
pub use error::{CoreError, Result};
pub use health::{HealthMonitor, HealthMonitorConfig, OverallHealth};
pub use manager::{ControlPlane, TaskOptions, TaskOutcome};
pub use pipeline::{PipelineExecutor, PipelineOutcome, PipelineStep, StepResult};
pub use registry::{
    CapabilitySet, CostMetric, CostProfile, HealthState, HealthStatus, HealthUpdate,
    LatencyProfile, Location, ModelRegistry, PrivacyFlags, RegistryEntry, SelectionConstraints,
    UpdatePolicy, VersionPin,
};
pub use routing::{RouteOptions, RouterConfig, RoutingDecision, TaskKind, TaskRouter};
