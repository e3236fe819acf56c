//! Capability-matched task router with health-aware scoring and fallback
//! chains.

use super::types::{RouteOptions, RouterConfig, RoutingDecision, TaskKind};
use crate::error::{CoreError, Result};
use crate::registry::entry::{HealthState, HealthStatus, Location, RegistryEntry};
use crate::registry::ModelRegistry;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Router that selects a backend entry for a task and produces an ordered
/// fallback chain.
pub struct TaskRouter {
    /// Registry the router selects from.
    registry: Arc<ModelRegistry>,
    /// Global routing preferences, overridable per request.
    config: RwLock<RouterConfig>,
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("config", &*self.config.read().expect("config lock poisoned"))
            .finish_non_exhaustive()
    }
}

impl TaskRouter {
    /// Creates a router over the given registry with default preferences.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry, config: RwLock::new(RouterConfig::default()) }
    }

    /// Creates a router with explicit preferences.
    #[must_use]
    pub fn with_config(registry: Arc<ModelRegistry>, config: RouterConfig) -> Self {
        Self { registry, config: RwLock::new(config) }
    }

    /// Replaces the global routing preferences.
    ///
    /// Location preferences (`prefer_local`/`prefer_cloud`) are recorded for
    /// operators but do not enter the scoring formula.
    pub fn set_config(&self, config: RouterConfig) {
        *self.config.write().expect("config lock poisoned") = config;
    }

    /// Returns the current global routing preferences.
    #[must_use]
    pub fn config(&self) -> RouterConfig {
        *self.config.read().expect("config lock poisoned")
    }

    /// Routes a task to the best available entry.
    ///
    /// A privacy requirement is tried first against local, offline-capable
    /// entries; if none is available the general path proceeds. The general
    /// path filters candidates by capability, health, and context length,
    /// scores them, and picks the highest score (first registered wins
    /// ties).
    ///
    /// # Errors
    /// Returns `CoreError::NoModelAvailable` when no candidate satisfies the
    /// task.
    pub fn route_task(&self, options: &RouteOptions) -> Result<RoutingDecision> {
        let kind = options.task_kind();
        let snapshot = self.registry.snapshot();

        if options.require_private {
            if let Some(decision) = self.route_private(&snapshot, kind) {
                return Ok(decision);
            }
            debug!(task = %kind, "No private entry available, continuing on general path");
        }

        let required = kind.required_capabilities().union(&options.extra_capabilities);

        let candidates: Vec<&(RegistryEntry, HealthStatus)> = snapshot
            .iter()
            .filter(|(entry, status)| {
                entry.enabled
                    && status.is_available()
                    && entry.capabilities.satisfies(&required)
                    && entry.max_context_length >= options.context_length
            })
            .collect();

        if candidates.is_empty() {
            return Err(CoreError::NoModelAvailable(format!(
                "no enabled healthy entry satisfies task '{kind}'"
            )));
        }

        let config = self.config();
        let cost_optimization = options.cost_optimization.unwrap_or(config.cost_optimization);
        let speed_optimization = options.speed_optimization.unwrap_or(config.speed_optimization);

        // Strictly-greater comparison keeps the first registered candidate on
        // ties, making repeated calls stable.
        let mut best: Option<(&RegistryEntry, f64)> = None;
        for (entry, status) in &candidates {
            let score = score_entry(entry, status, kind, cost_optimization, speed_optimization);
            debug!(model_id = %entry.id, score, task = %kind, "Scored candidate");
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((entry, score));
            }
        }
        let (chosen, score) =
            best.expect("candidate set is non-empty, a best candidate must exist");

        let confidence = if score > 80.0 {
            0.9
        } else if score > 60.0 {
            0.7
        } else {
            0.5
        };

        let fallback_chain = self.build_fallback_chain(&snapshot, chosen);

        let decision = RoutingDecision {
            model_id: chosen.id.clone(),
            provider: chosen.provider.clone(),
            confidence,
            reason: format!(
                "highest score {score:.1} for task '{kind}' among {} candidate(s)",
                candidates.len()
            ),
            fallback_chain,
        };

        info!(
            model_id = %decision.model_id,
            provider = %decision.provider,
            confidence = decision.confidence,
            task = %kind,
            fallbacks = decision.fallback_chain.len(),
            "Routing decision made"
        );

        Ok(decision)
    }

    /// Tries the privacy path: a local, offline-capable, available entry.
    fn route_private(
        &self,
        snapshot: &[(RegistryEntry, HealthStatus)],
        kind: TaskKind,
    ) -> Option<RoutingDecision> {
        let chosen = snapshot.iter().find(|(entry, status)| {
            entry.enabled
                && status.is_available()
                && entry.location == Location::Local
                && entry.offline_capable
        })?;

        let decision = RoutingDecision {
            model_id: chosen.0.id.clone(),
            provider: chosen.0.provider.clone(),
            confidence: 0.9,
            reason: format!("privacy requirement: local offline-capable entry for task '{kind}'"),
            fallback_chain: self.build_fallback_chain(snapshot, &chosen.0),
        };
        info!(model_id = %decision.model_id, task = %kind, "Routed via privacy path");
        Some(decision)
    }

    /// Builds the ordered fallback chain for a chosen entry: its explicit
    /// `fallback_to` list filtered to currently-healthy entries, then the
    /// first other healthy enabled entry not already included. The chain
    /// never contains the chosen entry itself.
    fn build_fallback_chain(
        &self,
        snapshot: &[(RegistryEntry, HealthStatus)],
        chosen: &RegistryEntry,
    ) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();

        for id in &chosen.fallback_to {
            if id == &chosen.id || chain.contains(id) {
                continue;
            }
            let healthy = snapshot.iter().any(|(entry, status)| {
                &entry.id == id && entry.enabled && status.is_healthy()
            });
            if healthy {
                chain.push(id.clone());
            }
        }

        if let Some((extra, _)) = snapshot.iter().find(|(entry, status)| {
            entry.id != chosen.id
                && entry.enabled
                && status.is_healthy()
                && !chain.contains(&entry.id)
        }) {
            chain.push(extra.id.clone());
        }

        chain
    }
}

/// Scores a candidate entry for a task.
///
/// Start at 100; subtract priority×0.1; subtract 20 when degraded; subtract
/// measured latency×0.01; when cost-optimizing subtract avg(input, output)
/// token price×1000; when speed-optimizing subtract p50×0.1; add 50 for a
/// declared task affinity.
fn score_entry(
    entry: &RegistryEntry,
    status: &HealthStatus,
    kind: TaskKind,
    cost_optimization: bool,
    speed_optimization: bool,
) -> f64 {
    let mut score = 100.0;
    score -= f64::from(entry.priority) * 0.1;
    if status.state == HealthState::Degraded {
        score -= 20.0;
    }
    score -= status.latency_ms * 0.01;
    if cost_optimization {
        score -= entry.cost.average() * 1000.0;
    }
    if speed_optimization {
        score -= entry.latency.p50_ms * 0.1;
    }
    if entry.preferred_for.contains(&kind) {
        score += 50.0;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::entry::{CapabilitySet, HealthUpdate};
    use conflux_backends::{BackendSettings, FactoryRegistry};

    fn setup() -> (Arc<ModelRegistry>, TaskRouter) {
        let registry = Arc::new(ModelRegistry::new(Arc::new(FactoryRegistry::with_defaults())));
        let router = TaskRouter::new(Arc::clone(&registry));
        (registry, router)
    }

    fn entry(id: &str) -> RegistryEntry {
        RegistryEntry::new(id, "mock", BackendSettings::new("mock", id))
    }

    #[test]
    fn test_score_arithmetic_literal() {
        let candidate = entry("m")
            .with_priority(5)
            .with_cost(0.001, 0.003)
            .with_latency(200.0, 400.0, 800.0);
        let mut status = HealthStatus::initial();
        status.latency_ms = 150.0;

        // 100 - 5*0.1 - 150*0.01 = 98.0
        let base = score_entry(&candidate, &status, TaskKind::Reasoning, false, false);
        assert!((base - 98.0).abs() < 1e-9);

        // cost optimization subtracts avg(0.001, 0.003) * 1000 = 2.0
        let cost = score_entry(&candidate, &status, TaskKind::Reasoning, true, false);
        assert!((cost - 96.0).abs() < 1e-9);

        // speed optimization subtracts 200 * 0.1 = 20.0
        let speed = score_entry(&candidate, &status, TaskKind::Reasoning, false, true);
        assert!((speed - 78.0).abs() < 1e-9);

        // degraded subtracts 20
        status.state = HealthState::Degraded;
        let degraded = score_entry(&candidate, &status, TaskKind::Reasoning, false, false);
        assert!((degraded - 78.0).abs() < 1e-9);
    }

    #[test]
    fn test_affinity_bonus() {
        let candidate = entry("m").with_preferred_for(vec![TaskKind::Rag]);
        let status = HealthStatus::initial();
        let with_affinity = score_entry(&candidate, &status, TaskKind::Rag, false, false);
        let without = score_entry(&candidate, &status, TaskKind::Reasoning, false, false);
        assert!((with_affinity - without - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_cost_optimization_picks_cheap_entry() {
        let (registry, router) = setup();
        registry
            .register(entry("fast-cheap").with_priority(1).with_cost(0.001, 0.001))
            .unwrap();
        registry
            .register(entry("strong-expensive").with_priority(5).with_cost(0.01, 0.01))
            .unwrap();

        let decision = router
            .route_task(&RouteOptions {
                cost_optimization: Some(true),
                ..RouteOptions::for_task(TaskKind::Reasoning)
            })
            .unwrap();
        // fast-cheap: 100 - 0.1 - 1.0 = 98.9; strong-expensive: 100 - 0.5 - 10.0 = 89.5
        assert_eq!(decision.model_id, "fast-cheap");
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn test_route_without_optimization_prefers_low_priority() {
        let (registry, router) = setup();
        registry
            .register(entry("fast-cheap").with_priority(1).with_cost(0.001, 0.001))
            .unwrap();
        registry
            .register(entry("strong-expensive").with_priority(5).with_cost(0.01, 0.01))
            .unwrap();

        let decision = router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();
        // fast-cheap scores 99.9 vs strong-expensive 99.5.
        assert_eq!(decision.model_id, "fast-cheap");
    }

    #[test]
    fn test_route_is_deterministic_on_ties() {
        let (registry, router) = setup();
        registry.register(entry("first")).unwrap();
        registry.register(entry("second")).unwrap();

        for _ in 0..10 {
            let decision =
                router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();
            assert_eq!(decision.model_id, "first");
        }
    }

    #[test]
    fn test_route_no_candidates() {
        let (registry, router) = setup();
        registry.register(entry("text-only")).unwrap();

        let err = router.route_task(&RouteOptions::for_task(TaskKind::Vision)).unwrap_err();
        assert!(matches!(err, CoreError::NoModelAvailable(_)));
    }

    #[test]
    fn test_route_excludes_down_and_disabled() {
        let (registry, router) = setup();
        registry.register(entry("down")).unwrap();
        registry.register(entry("disabled")).unwrap();
        registry.register(entry("ok")).unwrap();
        registry.update_health("down", HealthUpdate::state(HealthState::Down)).unwrap();
        registry.disable("disabled").unwrap();

        let decision = router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();
        assert_eq!(decision.model_id, "ok");
    }

    #[test]
    fn test_route_respects_context_length() {
        let (registry, router) = setup();
        registry.register(entry("small").with_max_context_length(4096)).unwrap();
        registry.register(entry("large").with_max_context_length(128_000)).unwrap();

        let decision = router
            .route_task(&RouteOptions {
                context_length: 32_000,
                ..RouteOptions::for_task(TaskKind::Reasoning)
            })
            .unwrap();
        assert_eq!(decision.model_id, "large");
    }

    #[test]
    fn test_fallback_chain_invariants() {
        let (registry, router) = setup();
        registry
            .register(entry("primary").with_fallback_to(vec![
                "alt-1".to_string(),
                "alt-down".to_string(),
                "alt-2".to_string(),
            ]))
            .unwrap();
        registry.register(entry("alt-1")).unwrap();
        registry.register(entry("alt-down")).unwrap();
        registry.register(entry("alt-2")).unwrap();
        registry.register(entry("extra")).unwrap();
        registry.update_health("alt-down", HealthUpdate::state(HealthState::Down)).unwrap();

        let decision = router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();
        assert_eq!(decision.model_id, "primary");
        // Explicit fallbacks filtered to healthy, then the first other
        // healthy entry not already present.
        assert_eq!(decision.fallback_chain, vec!["alt-1", "alt-2", "extra"]);
        assert!(!decision.fallback_chain.contains(&decision.model_id));
    }

    #[test]
    fn test_privacy_path_prefers_local_offline() {
        let (registry, router) = setup();
        registry.register(entry("cloud-big").with_priority(1)).unwrap();
        registry
            .register(
                entry("local-small")
                    .with_priority(50)
                    .with_location(Location::Local)
                    .with_offline_capable(true),
            )
            .unwrap();

        let decision = router
            .route_task(&RouteOptions {
                require_private: true,
                ..RouteOptions::for_task(TaskKind::Reasoning)
            })
            .unwrap();
        assert_eq!(decision.model_id, "local-small");
    }

    #[test]
    fn test_privacy_path_falls_through_when_no_local_entry() {
        let (registry, router) = setup();
        registry.register(entry("cloud-only")).unwrap();

        let decision = router
            .route_task(&RouteOptions {
                require_private: true,
                ..RouteOptions::for_task(TaskKind::Reasoning)
            })
            .unwrap();
        assert_eq!(decision.model_id, "cloud-only");
    }

    #[test]
    fn test_extra_capabilities_narrow_candidates() {
        let (registry, router) = setup();
        registry.register(entry("plain")).unwrap();
        let mut caps = CapabilitySet::reasoning();
        caps.function_calling = true;
        registry.register(entry("tools").with_capabilities(caps)).unwrap();

        let decision = router
            .route_task(&RouteOptions {
                extra_capabilities: CapabilitySet {
                    function_calling: true,
                    ..CapabilitySet::default()
                },
                ..RouteOptions::for_task(TaskKind::Reasoning)
            })
            .unwrap();
        assert_eq!(decision.model_id, "tools");
    }
}
