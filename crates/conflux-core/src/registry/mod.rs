//! Model registry: the catalog of registered backend entries and their live
//! health, cost, and version-pin state.
//!
//! All state lives in in-memory maps guarded by `std::sync::RwLock`;
//! critical sections are short and never span an await point. The registry
//! performs no I/O of its own; backend handles are constructed through the
//! provider→factory map and memoized per entry id.

pub mod entry;

use crate::error::{CoreError, Result};
use crate::routing::TaskKind;
use chrono::{DateTime, Utc};
use conflux_abstraction::Backend;
use conflux_backends::FactoryRegistry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub use entry::{
    CapabilitySet, CostMetric, CostProfile, HealthState, HealthStatus, HealthUpdate,
    LatencyProfile, Location, PrivacyFlags, RegistryEntry, UpdatePolicy, VersionPin,
};

/// Maximum cost records retained per entry; oldest evicted first.
const MAX_COST_HISTORY: usize = 1000;

/// Constraints for [`ModelRegistry::best_for`].
#[derive(Debug, Clone, Default)]
pub struct SelectionConstraints {
    /// Required location, if any.
    pub location: Option<Location>,
    /// Required capability flags.
    pub capabilities: CapabilitySet,
    /// Prefer the cheapest matching entry.
    pub prefer_cost: bool,
    /// Prefer the fastest matching entry (by p50 latency).
    pub prefer_speed: bool,
}

/// Registry of backend entries and their live state.
pub struct ModelRegistry {
    /// Provider→factory map used to validate registrations and build handles.
    factories: Arc<FactoryRegistry>,
    /// Entry id → entry.
    entries: RwLock<HashMap<String, RegistryEntry>>,
    /// Entry ids in first-registration order (stable iteration/tie-breaking).
    order: RwLock<Vec<String>>,
    /// Entry id → health snapshot.
    health: RwLock<HashMap<String, HealthStatus>>,
    /// Entry id → recent cost records.
    costs: RwLock<HashMap<String, VecDeque<CostMetric>>>,
    /// Entry id → recorded version pin (not consulted by resolution).
    pins: RwLock<HashMap<String, VersionPin>>,
    /// Entry id → recorded update policy (not consulted by resolution).
    policies: RwLock<HashMap<String, UpdatePolicy>>,
    /// Entry id → memoized backend handle.
    handles: RwLock<HashMap<String, Arc<dyn Backend>>>,
    /// Default entry id used by `resolve(None)`.
    default_model: RwLock<Option<String>>,
    /// Entry id tried when the resolved entry is unavailable.
    fallback_model: RwLock<Option<String>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("entry_count", &self.order.read().expect("order lock poisoned").len())
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Creates a registry backed by the given factory map.
    #[must_use]
    pub fn new(factories: Arc<FactoryRegistry>) -> Self {
        Self {
            factories,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            health: RwLock::new(HashMap::new()),
            costs: RwLock::new(HashMap::new()),
            pins: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            default_model: RwLock::new(None),
            fallback_model: RwLock::new(None),
        }
    }

    /// Registers an entry, overwriting any existing entry with the same id.
    ///
    /// A fresh registration starts `Healthy`; an overwrite keeps the entry's
    /// existing health snapshot and its position in registration order. Any
    /// memoized backend handle is dropped so changed settings take effect.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownProvider` if no backend factory is
    /// registered for the entry's provider.
    pub fn register(&self, entry: RegistryEntry) -> Result<()> {
        if !self.factories.contains(&entry.provider) {
            warn!(model_id = %entry.id, provider = %entry.provider, "Rejecting registration: unknown provider");
            return Err(CoreError::UnknownProvider { provider: entry.provider });
        }

        let id = entry.id.clone();
        let mut entries = self.entries.write().expect("entries lock poisoned");
        let was_new = !entries.contains_key(&id);
        entries.insert(id.clone(), entry);
        drop(entries);

        if was_new {
            self.order.write().expect("order lock poisoned").push(id.clone());
            self.health
                .write()
                .expect("health lock poisoned")
                .insert(id.clone(), HealthStatus::initial());
        } else {
            warn!(model_id = %id, "Entry replaced in registry");
        }
        self.handles.write().expect("handles lock poisoned").remove(&id);

        debug!(model_id = %id, was_new, "Registered entry");
        Ok(())
    }

    /// Removes an entry and cascades removal of its health, cost, pin,
    /// policy, and handle state.
    ///
    /// # Returns
    /// `true` if the entry existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.entries.write().expect("entries lock poisoned").remove(id).is_some();
        if removed {
            self.order.write().expect("order lock poisoned").retain(|other| other != id);
            self.health.write().expect("health lock poisoned").remove(id);
            self.costs.write().expect("costs lock poisoned").remove(id);
            self.pins.write().expect("pins lock poisoned").remove(id);
            self.policies.write().expect("policies lock poisoned").remove(id);
            self.handles.write().expect("handles lock poisoned").remove(id);
            info!(model_id = %id, "Unregistered entry");
        } else {
            warn!(model_id = %id, "Attempted to unregister non-existent entry");
        }
        removed
    }

    /// Returns a copy of the entry with the given id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.read().expect("entries lock poisoned").get(id).cloned()
    }

    /// Lists all entries in first-registration order.
    #[must_use]
    pub fn list(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.read().expect("entries lock poisoned");
        let order = self.order.read().expect("order lock poisoned");
        order.iter().filter_map(|id| entries.get(id).cloned()).collect()
    }

    /// Snapshots all entries with their health, in first-registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(RegistryEntry, HealthStatus)> {
        let entries = self.entries.read().expect("entries lock poisoned");
        let health = self.health.read().expect("health lock poisoned");
        let order = self.order.read().expect("order lock poisoned");
        order
            .iter()
            .filter_map(|id| {
                let entry = entries.get(id)?;
                let status = health.get(id).cloned().unwrap_or_else(HealthStatus::initial);
                Some((entry.clone(), status))
            })
            .collect()
    }

    /// Returns the number of registered entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.order.read().expect("order lock poisoned").len()
    }

    /// Enables the entry with the given id.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownModel` if the id is not registered.
    pub fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true)
    }

    /// Disables the entry with the given id; disabled entries are never
    /// selected by resolution or routing.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownModel` if the id is not registered.
    pub fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut entries = self.entries.write().expect("entries lock poisoned");
        let entry = entries.get_mut(id).ok_or_else(|| CoreError::UnknownModel(id.to_string()))?;
        entry.enabled = enabled;
        debug!(model_id = %id, enabled, "Updated enabled state");
        Ok(())
    }

    /// Sets the default entry id used by `resolve(None)`.
    pub fn set_default_model(&self, id: Option<String>) {
        *self.default_model.write().expect("default lock poisoned") = id;
    }

    /// Sets the entry id tried when the resolved entry is unavailable.
    pub fn set_fallback_model(&self, id: Option<String>) {
        *self.fallback_model.write().expect("fallback lock poisoned") = id;
    }

    /// Merges a partial health update into an entry's snapshot and stamps
    /// `last_check`. The health monitor is the sole caller during normal
    /// operation.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownModel` if the id is not registered.
    pub fn update_health(&self, id: &str, update: HealthUpdate) -> Result<()> {
        if !self.entries.read().expect("entries lock poisoned").contains_key(id) {
            return Err(CoreError::UnknownModel(id.to_string()));
        }
        let mut health = self.health.write().expect("health lock poisoned");
        let status = health.entry(id.to_string()).or_insert_with(HealthStatus::initial);
        if let Some(state) = update.state {
            status.state = state;
        }
        if let Some(latency_ms) = update.latency_ms {
            status.latency_ms = latency_ms;
        }
        if let Some(error_rate) = update.error_rate {
            status.error_rate = error_rate;
        }
        if let Some(uptime) = update.uptime {
            status.uptime = uptime;
        }
        status.last_check = Utc::now();
        debug!(model_id = %id, state = %status.state, "Updated health");
        Ok(())
    }

    /// Returns the health snapshot for the given id.
    #[must_use]
    pub fn health(&self, id: &str) -> Option<HealthStatus> {
        self.health.read().expect("health lock poisoned").get(id).cloned()
    }

    /// Appends a cost record for `metric.model`, evicting the oldest record
    /// beyond the last 1000.
    pub fn record_cost(&self, metric: CostMetric) {
        let mut costs = self.costs.write().expect("costs lock poisoned");
        let history = costs.entry(metric.model.clone()).or_default();
        history.push_back(metric);
        while history.len() > MAX_COST_HISTORY {
            history.pop_front();
        }
    }

    /// Returns the retained cost records for the given id, oldest first.
    #[must_use]
    pub fn cost_history(&self, id: &str) -> Vec<CostMetric> {
        self.costs
            .read()
            .expect("costs lock poisoned")
            .get(id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sums recorded costs across all entries, optionally restricted to
    /// records at or after `since`.
    #[must_use]
    pub fn total_cost(&self, since: Option<DateTime<Utc>>) -> f64 {
        let costs = self.costs.read().expect("costs lock poisoned");
        costs
            .values()
            .flat_map(|history| history.iter())
            .filter(|metric| since.is_none_or(|cutoff| metric.timestamp >= cutoff))
            .map(|metric| metric.cost)
            .sum()
    }

    /// Records a version pin for the entry. The pin is surfaced via
    /// [`ModelRegistry::pinned_version`] but never consulted by `resolve` or
    /// routing.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownModel` if the id is not registered.
    pub fn pin_version(&self, id: &str, version: impl Into<String>) -> Result<()> {
        if !self.entries.read().expect("entries lock poisoned").contains_key(id) {
            return Err(CoreError::UnknownModel(id.to_string()));
        }
        let pin = VersionPin { version: version.into(), pinned_at: Utc::now() };
        info!(model_id = %id, version = %pin.version, "Recorded version pin");
        self.pins.write().expect("pins lock poisoned").insert(id.to_string(), pin);
        Ok(())
    }

    /// Returns the recorded version pin for the entry, if any.
    #[must_use]
    pub fn pinned_version(&self, id: &str) -> Option<VersionPin> {
        self.pins.read().expect("pins lock poisoned").get(id).cloned()
    }

    /// Records an update policy for the entry. Like version pins, recorded
    /// but never consulted by resolution.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownModel` if the id is not registered.
    pub fn set_update_policy(&self, id: &str, policy: UpdatePolicy) -> Result<()> {
        if !self.entries.read().expect("entries lock poisoned").contains_key(id) {
            return Err(CoreError::UnknownModel(id.to_string()));
        }
        self.policies.write().expect("policies lock poisoned").insert(id.to_string(), policy);
        Ok(())
    }

    /// Returns the recorded update policy for the entry, if any.
    #[must_use]
    pub fn update_policy(&self, id: &str) -> Option<UpdatePolicy> {
        self.policies.read().expect("policies lock poisoned").get(id).copied()
    }

    /// Resolves an entry id to a concrete backend handle.
    ///
    /// Resolution order: the given id (or the configured default model when
    /// no id is given); if that entry is missing, disabled, or `Down`, the
    /// configured fallback model; finally the first enabled and healthy
    /// entry in registration order.
    ///
    /// # Errors
    /// Returns `CoreError::NoModelAvailable` when nothing resolves, or a
    /// backend error if handle construction fails.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn Backend>> {
        self.resolve_entry(id).map(|(_, handle)| handle)
    }

    /// Like [`ModelRegistry::resolve`], but also returns the entry that
    /// actually serves the request (which may be a fallback).
    ///
    /// # Errors
    /// Returns `CoreError::NoModelAvailable` when nothing resolves, or a
    /// backend error if handle construction fails.
    pub fn resolve_entry(&self, id: Option<&str>) -> Result<(RegistryEntry, Arc<dyn Backend>)> {
        let requested = match id {
            Some(id) => Some(id.to_string()),
            None => self.default_model.read().expect("default lock poisoned").clone(),
        };

        if let Some(ref target) = requested {
            if let Some(resolved) = self.try_handle(target)? {
                return Ok(resolved);
            }
            debug!(model_id = %target, "Requested entry unavailable, trying fallback");
        }

        let fallback = self.fallback_model.read().expect("fallback lock poisoned").clone();
        if let Some(ref target) = fallback {
            if requested.as_deref() != Some(target.as_str()) {
                if let Some(resolved) = self.try_handle(target)? {
                    return Ok(resolved);
                }
            }
        }

        // Last resort: first enabled entry that is fully healthy.
        let candidates: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|(entry, status)| entry.enabled && status.is_healthy())
            .map(|(entry, _)| entry.id)
            .collect();
        for candidate in candidates {
            if let Some(resolved) = self.try_handle(&candidate)? {
                debug!(model_id = %candidate, "Resolved via healthy-entry fallback");
                return Ok(resolved);
            }
        }

        Err(CoreError::NoModelAvailable(match requested {
            Some(target) => format!("'{target}' is unavailable and no enabled healthy entry exists"),
            None => "no default model configured and no enabled healthy entry exists".to_string(),
        }))
    }

    /// Returns the entry and a handle if the entry is registered, enabled,
    /// and not `Down`; `None` otherwise.
    fn try_handle(&self, id: &str) -> Result<Option<(RegistryEntry, Arc<dyn Backend>)>> {
        let Some(entry) = self.get(id) else {
            return Ok(None);
        };
        if !entry.enabled {
            return Ok(None);
        }
        let available = self.health(id).map(|status| status.is_available()).unwrap_or(true);
        if !available {
            return Ok(None);
        }
        let handle = self.handle_for(&entry)?;
        Ok(Some((entry, handle)))
    }

    /// Constructs (or returns the memoized) backend handle for an entry.
    fn handle_for(&self, entry: &RegistryEntry) -> Result<Arc<dyn Backend>> {
        if let Some(handle) = self.handles.read().expect("handles lock poisoned").get(&entry.id) {
            return Ok(Arc::clone(handle));
        }
        let handle = self.factories.create(&entry.settings)?;
        self.handles
            .write()
            .expect("handles lock poisoned")
            .insert(entry.id.clone(), Arc::clone(&handle));
        debug!(model_id = %entry.id, provider = %entry.provider, "Constructed backend handle");
        Ok(handle)
    }

    /// Selects the best entry under the given constraints.
    ///
    /// Filters to enabled, available entries matching location and
    /// capabilities, then picks by cost or speed when requested, otherwise
    /// by priority. Ties keep registration order.
    ///
    /// # Errors
    /// Returns `CoreError::NoModelAvailable` when nothing matches.
    pub fn best_for(&self, constraints: &SelectionConstraints) -> Result<RegistryEntry> {
        let matches: Vec<RegistryEntry> = self
            .snapshot()
            .into_iter()
            .filter(|(entry, status)| {
                entry.enabled
                    && status.is_available()
                    && constraints.location.is_none_or(|location| entry.location == location)
                    && entry.capabilities.satisfies(&constraints.capabilities)
            })
            .map(|(entry, _)| entry)
            .collect();

        let best = if constraints.prefer_cost {
            matches.into_iter().min_by(|a, b| {
                a.cost.average().partial_cmp(&b.cost.average()).unwrap_or(std::cmp::Ordering::Equal)
            })
        } else if constraints.prefer_speed {
            matches.into_iter().min_by(|a, b| {
                a.latency.p50_ms.partial_cmp(&b.latency.p50_ms).unwrap_or(std::cmp::Ordering::Equal)
            })
        } else {
            matches.into_iter().min_by_key(|entry| entry.priority)
        };

        best.ok_or_else(|| {
            CoreError::NoModelAvailable("no entry matches the selection constraints".to_string())
        })
    }

    /// Entries declaring affinity for the given task kind, in registration
    /// order.
    #[must_use]
    pub fn preferred_for(&self, kind: TaskKind) -> Vec<RegistryEntry> {
        self.list().into_iter().filter(|entry| entry.preferred_for.contains(&kind)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_backends::BackendSettings;

    fn test_registry() -> ModelRegistry {
        ModelRegistry::new(Arc::new(FactoryRegistry::with_defaults()))
    }

    fn mock_entry(id: &str) -> RegistryEntry {
        RegistryEntry::new(id, "mock", BackendSettings::new("mock", id))
    }

    #[test]
    fn test_register_unknown_provider_rejected() {
        let registry = test_registry();
        let entry = RegistryEntry::new("m1", "no-such-provider", BackendSettings::new("", "m1"));
        let err = registry.register(entry).unwrap_err();
        assert!(matches!(err, CoreError::UnknownProvider { .. }));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_register_starts_healthy() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        let status = registry.health("m1").unwrap();
        assert_eq!(status.state, HealthState::Healthy);
    }

    #[test]
    fn test_register_overwrite_is_idempotent() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.update_health("m1", HealthUpdate::state(HealthState::Degraded)).unwrap();

        registry.register(mock_entry("m1").with_priority(3)).unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("m1").unwrap().priority, 3);
        // Overwrite keeps the live health snapshot.
        assert_eq!(registry.health("m1").unwrap().state, HealthState::Degraded);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let registry = test_registry();
        registry.register(mock_entry("b")).unwrap();
        registry.register(mock_entry("a")).unwrap();
        registry.register(mock_entry("c")).unwrap();
        let ids: Vec<String> = registry.list().into_iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_unregister_cascades() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.pin_version("m1", "1.0").unwrap();
        registry.set_update_policy("m1", UpdatePolicy::Manual).unwrap();
        registry.record_cost(CostMetric {
            model: "m1".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            cost: 0.01,
            latency_ms: 100,
            timestamp: Utc::now(),
        });

        assert!(registry.unregister("m1"));
        assert!(registry.get("m1").is_none());
        assert!(registry.health("m1").is_none());
        assert!(registry.pinned_version("m1").is_none());
        assert!(registry.update_policy("m1").is_none());
        assert!(registry.cost_history("m1").is_empty());
        assert!(!registry.unregister("m1"));
    }

    #[test]
    fn test_resolve_explicit_id() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        let backend = registry.resolve(Some("m1")).unwrap();
        assert_eq!(backend.model_id(), "m1");
    }

    #[test]
    fn test_resolve_uses_default_model() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.set_default_model(Some("m1".to_string()));
        let backend = registry.resolve(None).unwrap();
        assert_eq!(backend.model_id(), "m1");
    }

    #[test]
    fn test_resolve_falls_back_when_down() {
        let registry = test_registry();
        registry.register(mock_entry("primary")).unwrap();
        registry.register(mock_entry("secondary")).unwrap();
        registry.set_fallback_model(Some("secondary".to_string()));
        registry.update_health("primary", HealthUpdate::state(HealthState::Down)).unwrap();

        let backend = registry.resolve(Some("primary")).unwrap();
        assert_eq!(backend.model_id(), "secondary");
    }

    #[test]
    fn test_resolve_falls_back_to_any_healthy_entry() {
        let registry = test_registry();
        registry.register(mock_entry("primary")).unwrap();
        registry.register(mock_entry("other")).unwrap();
        registry.update_health("primary", HealthUpdate::state(HealthState::Down)).unwrap();

        let backend = registry.resolve(Some("primary")).unwrap();
        assert_eq!(backend.model_id(), "other");
    }

    #[test]
    fn test_resolve_nothing_available() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.update_health("m1", HealthUpdate::state(HealthState::Down)).unwrap();
        let err = registry.resolve(Some("m1")).unwrap_err();
        assert!(matches!(err, CoreError::NoModelAvailable(_)));
    }

    #[test]
    fn test_resolve_never_selects_disabled() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.disable("m1").unwrap();
        let err = registry.resolve(Some("m1")).unwrap_err();
        assert!(matches!(err, CoreError::NoModelAvailable(_)));
    }

    #[test]
    fn test_resolve_memoizes_handles() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        let first = registry.resolve(Some("m1")).unwrap();
        let second = registry.resolve(Some("m1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cost_history_ring_buffer() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        for i in 0..1005u64 {
            registry.record_cost(CostMetric {
                model: "m1".to_string(),
                prompt_tokens: i,
                completion_tokens: 0,
                cost: 0.001,
                latency_ms: 1,
                timestamp: Utc::now(),
            });
        }
        let history = registry.cost_history("m1");
        assert_eq!(history.len(), 1000);
        // Oldest five records were evicted.
        assert_eq!(history[0].prompt_tokens, 5);
    }

    #[test]
    fn test_total_cost_with_cutoff() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        let old = Utc::now() - chrono::Duration::hours(2);
        registry.record_cost(CostMetric {
            model: "m1".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            cost: 1.0,
            latency_ms: 1,
            timestamp: old,
        });
        registry.record_cost(CostMetric {
            model: "m1".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            cost: 2.0,
            latency_ms: 1,
            timestamp: Utc::now(),
        });

        assert!((registry.total_cost(None) - 3.0).abs() < 1e-9);
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert!((registry.total_cost(Some(cutoff)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_for_by_cost_and_priority() {
        let registry = test_registry();
        registry
            .register(mock_entry("cheap").with_priority(5).with_cost(0.001, 0.001))
            .unwrap();
        registry
            .register(mock_entry("pricey").with_priority(1).with_cost(0.01, 0.01))
            .unwrap();

        let by_cost = registry
            .best_for(&SelectionConstraints { prefer_cost: true, ..SelectionConstraints::default() })
            .unwrap();
        assert_eq!(by_cost.id, "cheap");

        let by_priority = registry.best_for(&SelectionConstraints::default()).unwrap();
        assert_eq!(by_priority.id, "pricey");
    }

    #[test]
    fn test_best_for_filters_capabilities() {
        let registry = test_registry();
        registry.register(mock_entry("text-only")).unwrap();
        let err = registry
            .best_for(&SelectionConstraints {
                capabilities: CapabilitySet { embeddings: true, ..CapabilitySet::default() },
                ..SelectionConstraints::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::NoModelAvailable(_)));
    }

    #[test]
    fn test_version_pin_recorded_not_enforced() {
        let registry = test_registry();
        registry.register(mock_entry("m1")).unwrap();
        registry.pin_version("m1", "0.9").unwrap();
        assert_eq!(registry.pinned_version("m1").unwrap().version, "0.9");
        // Resolution ignores the pin entirely.
        assert!(registry.resolve(Some("m1")).is_ok());
    }
}
