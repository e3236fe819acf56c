//! Control-plane façade: unified task execution with caching, metric
//! recording, and lifecycle management.
//!
//! The façade owns one explicitly constructed instance of each subsystem
//! (registry, router, cache, health monitor, pipeline executor, agent
//! coordinator) and passes them by reference. There is no process-wide
//! singleton; tests construct as many planes as they need.

use crate::agents::{AgentAssignment, AgentCoordinator, CoordinationOutcome};
use crate::cache::{CacheKeyParts, CacheStats, ResponseCache};
use crate::config::ControlPlaneConfig;
use crate::error::{CoreError, Result};
use crate::health::{HealthMonitor, OverallHealth};
use crate::pipeline::{value_to_text, PipelineExecutor, PipelineOutcome, PipelineStep};
use crate::registry::entry::{CapabilitySet, CostMetric};
use crate::registry::ModelRegistry;
use crate::routing::{RouteOptions, RouterConfig, RoutingDecision, TaskKind, TaskRouter};
use chrono::{DateTime, Utc};
use conflux_abstraction::{ChatMessage, CompletionParameters};
use conflux_backends::FactoryRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Options for one task execution through the façade.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// The task kind. `None` defaults to reasoning.
    pub task: Option<TaskKind>,
    /// The task input.
    pub input: Value,
    /// Explicit target entry id; `None` routes automatically.
    pub model: Option<String>,
    /// Required context window, in tokens.
    pub context_length: u32,
    /// Route to a local, offline-capable entry if one is healthy.
    pub require_private: bool,
    /// Extra capability flags beyond the task kind's fixed mapping.
    pub extra_capabilities: CapabilitySet,
    /// Generation parameters forwarded to the backend.
    pub parameters: Option<CompletionParameters>,
    /// Skip the cache for this request.
    pub bypass_cache: bool,
}

impl TaskOptions {
    /// Options for a task of the given kind with the given input.
    #[must_use]
    pub fn new(task: TaskKind, input: Value) -> Self {
        Self { task: Some(task), input, ..Self::default() }
    }

    /// Targets a specific entry instead of automatic routing.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// The result of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    /// The produced value.
    pub value: Value,
    /// The entry id that served the request (or was recorded at cache time).
    pub model_id: String,
    /// The serving entry's provider.
    pub provider: String,
    /// Whether the value came from the cache.
    pub cached: bool,
    /// Wall-clock duration, in milliseconds.
    pub duration_ms: u64,
}

/// The shape stored in the response cache for a task.
#[derive(Debug, Serialize, Deserialize)]
struct CachedTask {
    value: Value,
    model_id: String,
    provider: String,
}

/// The control-plane façade.
pub struct ControlPlane {
    registry: Arc<ModelRegistry>,
    router: Arc<TaskRouter>,
    cache: Arc<ResponseCache>,
    monitor: HealthMonitor,
    pipelines: PipelineExecutor,
    coordinator: AgentCoordinator,
    sweeper_tx: Option<mpsc::UnboundedSender<()>>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("entries", &self.registry.count())
            .field("running", &self.sweeper_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    /// Builds a control plane from configuration, using the built-in backend
    /// factories.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a declared model
    /// references an unknown provider.
    pub fn new(config: ControlPlaneConfig) -> Result<Self> {
        Self::with_factories(config, Arc::new(FactoryRegistry::with_defaults()))
    }

    /// Builds a control plane with an explicit factory registry (custom
    /// providers plug in here).
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a declared model
    /// references an unknown provider.
    pub fn with_factories(
        config: ControlPlaneConfig,
        factories: Arc<FactoryRegistry>,
    ) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::new(factories));
        for model in config.models {
            registry.register(model.into_entry())?;
        }
        registry.set_default_model(config.default_model);
        registry.set_fallback_model(config.fallback_model);

        let router = Arc::new(TaskRouter::with_config(Arc::clone(&registry), config.router));
        let cache = Arc::new(
            ResponseCache::new(config.cache).map_err(|e| CoreError::InvalidConfig(e.to_string()))?,
        );
        let monitor = HealthMonitor::new(Arc::clone(&registry), config.health);
        let pipelines = PipelineExecutor::new(Arc::clone(&registry), Arc::clone(&router));
        let coordinator = AgentCoordinator::new(Arc::clone(&registry));

        Ok(Self {
            registry,
            router,
            cache,
            monitor,
            pipelines,
            coordinator,
            sweeper_tx: None,
        })
    }

    /// The underlying registry, for registration and direct queries.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Starts background work: health monitoring and the cache expiry
    /// sweeper.
    ///
    /// # Errors
    /// Returns an error if the plane is already running.
    pub fn start(&mut self) -> std::result::Result<(), String> {
        if self.sweeper_tx.is_some() {
            return Err("Control plane is already running".to_string());
        }
        self.monitor.start()?;

        let (sweeper_tx, mut sweeper_rx) = mpsc::unbounded_channel();
        self.sweeper_tx = Some(sweeper_tx);

        let cache = Arc::clone(&self.cache);
        let interval = self.cache.config().sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = sweeper_rx.recv() => break,
                    _ = ticker.tick() => {
                        cache.purge_expired();
                    }
                }
            }
        });

        info!("Control plane started");
        Ok(())
    }

    /// Stops background work.
    ///
    /// # Errors
    /// Returns an error if the plane is not running.
    pub fn stop(&mut self) -> std::result::Result<(), String> {
        let Some(sweeper_tx) = self.sweeper_tx.take() else {
            return Err("Control plane is not running".to_string());
        };
        let _ = sweeper_tx.send(());
        self.monitor.stop()?;
        info!("Control plane stopped");
        Ok(())
    }

    /// Whether background work is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweeper_tx.is_some()
    }

    /// Executes one task: cache lookup, routing, backend dispatch, metric
    /// recording, and cache write-back.
    ///
    /// # Errors
    /// Returns a typed error when no entry satisfies the task or the backend
    /// call fails. Cached hits never fail.
    pub async fn execute_task(&self, options: &TaskOptions) -> Result<TaskOutcome> {
        let started = Instant::now();
        let kind = options.task.unwrap_or(TaskKind::Reasoning);
        let task_name = kind.to_string();
        let (temperature, max_tokens) = options
            .parameters
            .as_ref()
            .map_or((None, None), |params| (params.temperature, params.max_tokens));

        let key = ResponseCache::generate_key(&CacheKeyParts {
            model: options.model.as_deref().unwrap_or("auto"),
            task: &task_name,
            input: &options.input,
            temperature,
            max_tokens,
        });

        if !options.bypass_cache {
            if let Some(stored) = self.cache.get(&key) {
                if let Ok(cached) = serde_json::from_value::<CachedTask>(stored) {
                    debug!(task = %task_name, "Task served from cache");
                    return Ok(TaskOutcome {
                        value: cached.value,
                        model_id: cached.model_id,
                        provider: cached.provider,
                        cached: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        let target = match options.model {
            Some(ref id) => id.clone(),
            None => {
                self.router
                    .route_task(&RouteOptions {
                        task: Some(kind),
                        context_length: options.context_length,
                        require_private: options.require_private,
                        extra_capabilities: options.extra_capabilities,
                        cost_optimization: None,
                        speed_optimization: None,
                    })?
                    .model_id
            }
        };
        let (entry, backend) = self.registry.resolve_entry(Some(&target))?;

        let input_text = value_to_text(&options.input);
        let (value, usage) = match kind {
            TaskKind::Embedding => {
                let vectors = backend.generate_embeddings(&[input_text], None).await?;
                (serde_json::json!(vectors), None)
            }
            TaskKind::Vision | TaskKind::Audio => {
                let response = backend
                    .multimodal_completion(
                        &[ChatMessage::user(input_text)],
                        options.parameters.clone(),
                    )
                    .await?;
                (Value::String(response.content), response.usage)
            }
            _ => {
                let response = backend
                    .chat_completion(&[ChatMessage::user(input_text)], options.parameters.clone())
                    .await?;
                (Value::String(response.content), response.usage)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (prompt_tokens, completion_tokens) =
            usage.map_or((0, 0), |u| (u64::from(u.prompt_tokens), u64::from(u.completion_tokens)));
        let cost = prompt_tokens as f64 * entry.cost.input_per_token
            + completion_tokens as f64 * entry.cost.output_per_token;
        self.registry.record_cost(CostMetric {
            model: entry.id.clone(),
            prompt_tokens,
            completion_tokens,
            cost,
            latency_ms: duration_ms,
            timestamp: Utc::now(),
        });

        let record = serde_json::to_value(CachedTask {
            value: value.clone(),
            model_id: entry.id.clone(),
            provider: entry.provider.clone(),
        })?;
        self.cache.set(key, record, None);

        Ok(TaskOutcome {
            value,
            model_id: entry.id,
            provider: entry.provider,
            cached: false,
            duration_ms,
        })
    }

    /// Routes a task without executing it.
    ///
    /// # Errors
    /// Returns `CoreError::NoModelAvailable` when no candidate satisfies the
    /// task.
    pub fn route_task(&self, options: &RouteOptions) -> Result<RoutingDecision> {
        self.router.route_task(options)
    }

    /// Executes a pipeline graph. Always returns an outcome; per-step
    /// failures are reported inside it.
    pub async fn execute_pipeline(&self, steps: &[PipelineStep]) -> PipelineOutcome {
        self.pipelines.execute(steps).await
    }

    /// Coordinates agent roles. Always returns an outcome; per-role
    /// failures are reported inside it.
    pub async fn coordinate_agents(
        &self,
        task: &str,
        context: &Value,
        roles: &[AgentAssignment],
    ) -> CoordinationOutcome {
        self.coordinator.coordinate(task, context, roles).await
    }

    /// Clears agent memory buffers (see
    /// [`AgentCoordinator::clear_agent_memory`]).
    pub fn clear_agent_memory(&self, provider: Option<&str>, role: Option<&str>) {
        self.coordinator.clear_agent_memory(provider, role);
    }

    /// Probes every enabled entry once, outside the periodic schedule.
    pub async fn check_all_models(&self) {
        self.monitor.check_all_models().await;
    }

    /// Aggregated health counts across enabled entries.
    #[must_use]
    pub fn overall_health(&self) -> OverallHealth {
        self.monitor.overall_health()
    }

    /// Current cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Total recorded cost, optionally restricted to records at or after
    /// `since`.
    #[must_use]
    pub fn total_cost(&self, since: Option<DateTime<Utc>>) -> f64 {
        self.registry.total_cost(since)
    }

    /// Replaces the global routing preferences.
    pub fn set_preferences(&self, config: RouterConfig) {
        self.router.set_config(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::entry::RegistryEntry;
    use conflux_backends::BackendSettings;
    use serde_json::json;

    fn plane_with_mock() -> ControlPlane {
        let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
        plane
            .registry()
            .register(
                RegistryEntry::new("m1", "mock", BackendSettings::new("mock", "m1"))
                    .with_cost(0.001, 0.002),
            )
            .unwrap();
        plane
    }

    #[tokio::test]
    async fn test_execute_task_roundtrip_and_cache() {
        let plane = plane_with_mock();
        let options = TaskOptions::new(TaskKind::Reasoning, json!("what is 2+2"));

        let first = plane.execute_task(&options).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.model_id, "m1");
        assert!(first.value.as_str().unwrap().contains("what is 2+2"));

        let second = plane.execute_task(&options).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.value, first.value);
        assert_eq!(second.model_id, "m1");
    }

    #[tokio::test]
    async fn test_bypass_cache_recomputes() {
        let plane = plane_with_mock();
        let mut options = TaskOptions::new(TaskKind::Reasoning, json!("again"));
        plane.execute_task(&options).await.unwrap();

        options.bypass_cache = true;
        let fresh = plane.execute_task(&options).await.unwrap();
        assert!(!fresh.cached);
    }

    #[tokio::test]
    async fn test_execute_task_records_cost() {
        let plane = plane_with_mock();
        let options = TaskOptions::new(TaskKind::Reasoning, json!("count my tokens"));
        plane.execute_task(&options).await.unwrap();

        assert!(plane.total_cost(None) > 0.0);
        let history = plane.registry().cost_history("m1");
        assert_eq!(history.len(), 1);
        assert!(history[0].prompt_tokens > 0);
    }

    #[tokio::test]
    async fn test_execute_task_no_model_available() {
        let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
        let err = plane
            .execute_task(&TaskOptions::new(TaskKind::Reasoning, json!("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoModelAvailable(_)));
    }

    #[tokio::test]
    async fn test_execute_embedding_task() {
        let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
        let mut caps = CapabilitySet::default();
        caps.embeddings = true;
        plane
            .registry()
            .register(
                RegistryEntry::new("embedder", "mock", BackendSettings::new("mock", "embedder"))
                    .with_capabilities(caps),
            )
            .unwrap();

        let outcome = plane
            .execute_task(&TaskOptions::new(TaskKind::Embedding, json!("embed me")))
            .await
            .unwrap();
        assert!(outcome.value.is_array());
        assert_eq!(outcome.model_id, "embedder");
    }

    #[tokio::test]
    async fn test_explicit_model_skips_routing() {
        let plane = plane_with_mock();
        plane
            .registry()
            .register(RegistryEntry::new("m2", "mock", BackendSettings::new("mock", "m2")))
            .unwrap();

        let outcome = plane
            .execute_task(
                &TaskOptions::new(TaskKind::Reasoning, json!("direct")).with_model("m2"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.model_id, "m2");
    }

    #[tokio::test]
    async fn test_pipeline_delegation() {
        let plane = plane_with_mock();
        let steps = vec![PipelineStep::new("only", TaskKind::Reasoning, json!("solo step"))];
        let outcome = plane.execute_pipeline(&steps).await;
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_coordination_delegation() {
        let plane = plane_with_mock();
        let roles = vec![AgentAssignment::new("m1", "writer")];
        let outcome = plane.coordinate_agents("write", &Value::Null, &roles).await;
        assert!(outcome.success);
        plane.clear_agent_memory(None, None);
    }

    #[tokio::test]
    async fn test_lifecycle_start_stop() {
        let mut plane = plane_with_mock();
        assert!(!plane.is_running());
        plane.start().unwrap();
        assert!(plane.is_running());
        assert!(plane.start().is_err());
        plane.stop().unwrap();
        assert!(!plane.is_running());
        assert!(plane.stop().is_err());
    }

    #[tokio::test]
    async fn test_overall_health_via_facade() {
        let plane = plane_with_mock();
        plane.check_all_models().await;
        let overall = plane.overall_health();
        assert_eq!(overall.total, 1);
        assert_eq!(overall.healthy, 1);
    }

    #[tokio::test]
    async fn test_cache_stats_via_facade() {
        let plane = plane_with_mock();
        plane
            .execute_task(&TaskOptions::new(TaskKind::Reasoning, json!("fill cache")))
            .await
            .unwrap();
        assert_eq!(plane.cache_stats().size, 1);
    }

    #[tokio::test]
    async fn test_set_preferences_changes_routing() {
        let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
        plane
            .registry()
            .register(
                RegistryEntry::new("cheap", "mock", BackendSettings::new("mock", "cheap"))
                    .with_priority(5)
                    .with_cost(0.000_01, 0.000_01),
            )
            .unwrap();
        plane
            .registry()
            .register(
                RegistryEntry::new("pricey", "mock", BackendSettings::new("mock", "pricey"))
                    .with_priority(1)
                    .with_cost(0.01, 0.01),
            )
            .unwrap();

        plane.set_preferences(RouterConfig {
            cost_optimization: true,
            ..RouterConfig::default()
        });
        let outcome = plane
            .execute_task(&TaskOptions::new(TaskKind::Reasoning, json!("routed")))
            .await
            .unwrap();
        assert_eq!(outcome.model_id, "cheap");
    }
}
