//! Multi-agent coordinator: runs an ordered list of agent roles against the
//! registry, each with independent bounded conversational memory.
//!
//! Coordination is strictly sequential: later roles see earlier roles'
//! results through the accumulated `previous_results` object. A role failure
//! is recorded as that role's result and never aborts the remaining roles,
//! so the caller always receives a complete report.

use crate::error::{CoreError, Result};
use crate::registry::ModelRegistry;
use chrono::{DateTime, Utc};
use conflux_abstraction::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of memory turns kept per role.
const DEFAULT_MAX_MEMORY_TURNS: usize = 10;

/// One role assignment in a coordination run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssignment {
    /// The registry entry id the role runs against.
    pub model_id: String,
    /// The role name (e.g., "researcher", "critic").
    pub role: String,
}

impl AgentAssignment {
    /// Creates an assignment binding a role to a registry entry.
    #[must_use]
    pub fn new(model_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self { model_id: model_id.into(), role: role.into() }
    }
}

/// The recorded result of one role's turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRunResult {
    /// The role name.
    pub role: String,
    /// The registry entry id the role was bound to.
    pub model_id: String,
    /// The produced response, when successful.
    pub response: Option<String>,
    /// The failure message, when unsuccessful.
    pub error: Option<String>,
    /// When the turn completed.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the turn, in milliseconds.
    pub duration_ms: u64,
}

/// The outcome of a coordination run. Always returned, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinationOutcome {
    /// True only if every role succeeded.
    pub success: bool,
    /// Per-role results in execution order.
    pub results: Vec<AgentRunResult>,
}

/// Coordinator over registry-backed agent roles.
pub struct AgentCoordinator {
    registry: Arc<ModelRegistry>,
    /// Bounded conversation buffers keyed by `provider:role`.
    memory: RwLock<HashMap<String, VecDeque<ChatMessage>>>,
    /// Turns kept per buffer; oldest dropped first.
    max_memory_turns: usize,
}

impl std::fmt::Debug for AgentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCoordinator")
            .field("max_memory_turns", &self.max_memory_turns)
            .field("buffers", &self.memory.read().expect("memory lock poisoned").len())
            .finish_non_exhaustive()
    }
}

impl AgentCoordinator {
    /// Creates a coordinator with the default memory bound.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self::with_max_memory_turns(registry, DEFAULT_MAX_MEMORY_TURNS)
    }

    /// Creates a coordinator keeping the last `max_memory_turns` turns per
    /// role.
    #[must_use]
    pub fn with_max_memory_turns(registry: Arc<ModelRegistry>, max_memory_turns: usize) -> Self {
        Self { registry, memory: RwLock::new(HashMap::new()), max_memory_turns }
    }

    /// Runs the given roles sequentially against a shared task description
    /// and context. Later roles see earlier roles' responses in their
    /// prompt. Per-role failures are captured in the outcome.
    pub async fn coordinate(
        &self,
        task: &str,
        context: &Value,
        roles: &[AgentAssignment],
    ) -> CoordinationOutcome {
        let run_id = Uuid::new_v4();
        info!(%run_id, roles = roles.len(), "Agent coordination starting");

        let mut previous_results = serde_json::Map::new();
        let mut results = Vec::with_capacity(roles.len());

        for assignment in roles {
            let started = Instant::now();
            let turn = self.run_role(task, context, &previous_results, assignment).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match turn {
                Ok(response) => {
                    previous_results
                        .insert(assignment.role.clone(), Value::String(response.clone()));
                    results.push(AgentRunResult {
                        role: assignment.role.clone(),
                        model_id: assignment.model_id.clone(),
                        response: Some(response),
                        error: None,
                        timestamp: Utc::now(),
                        duration_ms,
                    });
                }
                Err(e) => {
                    warn!(role = %assignment.role, error = %e, "Agent role failed");
                    results.push(AgentRunResult {
                        role: assignment.role.clone(),
                        model_id: assignment.model_id.clone(),
                        response: None,
                        error: Some(e.to_string()),
                        timestamp: Utc::now(),
                        duration_ms,
                    });
                }
            }
        }

        let success = results.iter().all(|result| result.error.is_none());
        info!(%run_id, success, "Agent coordination finished");
        CoordinationOutcome { success, results }
    }

    async fn run_role(
        &self,
        task: &str,
        context: &Value,
        previous_results: &serde_json::Map<String, Value>,
        assignment: &AgentAssignment,
    ) -> Result<String> {
        let entry = self
            .registry
            .get(&assignment.model_id)
            .ok_or_else(|| CoreError::UnknownModel(assignment.model_id.clone()))?;
        let backend = self.registry.resolve(Some(&assignment.model_id))?;
        let memory_key = format!("{}:{}", entry.provider, assignment.role);

        let mut prompt = format!("Task: {task}");
        if !context.is_null() {
            prompt.push_str(&format!("\nContext: {context}"));
        }
        if !previous_results.is_empty() {
            prompt.push_str(&format!(
                "\nPrevious agent results: {}",
                Value::Object(previous_results.clone())
            ));
        }

        let mut messages =
            vec![ChatMessage::system(format!("You are acting as the '{}' agent.", assignment.role))];
        {
            let memory = self.memory.read().expect("memory lock poisoned");
            if let Some(buffer) = memory.get(&memory_key) {
                messages.extend(buffer.iter().cloned());
            }
        }
        messages.push(ChatMessage::user(prompt.clone()));

        debug!(
            role = %assignment.role,
            model_id = %assignment.model_id,
            memory_key = %memory_key,
            message_count = messages.len(),
            "Running agent role"
        );

        let response = backend.chat_completion(&messages, None).await?;

        // Append the new turn pair and trim to the bound.
        let mut memory = self.memory.write().expect("memory lock poisoned");
        let buffer = memory.entry(memory_key).or_default();
        buffer.push_back(ChatMessage::user(prompt));
        buffer.push_back(ChatMessage::assistant(response.content.clone()));
        while buffer.len() > self.max_memory_turns {
            buffer.pop_front();
        }

        Ok(response.content)
    }

    /// Clears one role's memory buffer, all buffers for a provider or role,
    /// or every buffer when both arguments are omitted.
    pub fn clear_agent_memory(&self, provider: Option<&str>, role: Option<&str>) {
        let mut memory = self.memory.write().expect("memory lock poisoned");
        match (provider, role) {
            (Some(provider), Some(role)) => {
                memory.remove(&format!("{provider}:{role}"));
            }
            (Some(provider), None) => {
                let prefix = format!("{provider}:");
                memory.retain(|key, _| !key.starts_with(&prefix));
            }
            (None, Some(role)) => {
                let suffix = format!(":{role}");
                memory.retain(|key, _| !key.ends_with(&suffix));
            }
            (None, None) => memory.clear(),
        }
        debug!(?provider, ?role, "Cleared agent memory");
    }

    /// Number of turns currently buffered for `provider:role`.
    #[must_use]
    pub fn memory_len(&self, provider: &str, role: &str) -> usize {
        self.memory
            .read()
            .expect("memory lock poisoned")
            .get(&format!("{provider}:{role}"))
            .map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::entry::RegistryEntry;
    use conflux_backends::{BackendSettings, FactoryRegistry};
    use serde_json::json;

    fn setup() -> (Arc<ModelRegistry>, AgentCoordinator) {
        let registry = Arc::new(ModelRegistry::new(Arc::new(FactoryRegistry::with_defaults())));
        registry
            .register(RegistryEntry::new("m1", "mock", BackendSettings::new("mock", "m1")))
            .unwrap();
        let coordinator = AgentCoordinator::new(Arc::clone(&registry));
        (registry, coordinator)
    }

    fn failing_entry(id: &str) -> RegistryEntry {
        let mut settings = BackendSettings::new("mock", id);
        settings.extra = json!({"fail": "role backend failure"});
        RegistryEntry::new(id, "mock", settings)
    }

    #[tokio::test]
    async fn test_sequential_roles_see_previous_results() {
        let (_registry, coordinator) = setup();
        let roles = vec![
            AgentAssignment::new("m1", "researcher"),
            AgentAssignment::new("m1", "critic"),
        ];

        let outcome = coordinator.coordinate("analyze the data", &Value::Null, &roles).await;
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 2);

        // The critic's prompt included the researcher's output; the mock
        // echoes its prompt, so the marker text propagates.
        let critic = &outcome.results[1];
        assert!(critic.response.as_ref().unwrap().contains("Previous agent results"));
        assert!(critic.response.as_ref().unwrap().contains("researcher"));
    }

    #[tokio::test]
    async fn test_role_failure_does_not_abort_run() {
        let (registry, coordinator) = setup();
        registry.register(failing_entry("flaky")).unwrap();
        // Keep resolution from falling back to a healthy entry: the flaky
        // entry itself is healthy, only its backend fails.
        let roles = vec![
            AgentAssignment::new("flaky", "planner"),
            AgentAssignment::new("m1", "executor"),
        ];

        let outcome = coordinator.coordinate("do the thing", &Value::Null, &roles).await;
        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[0].error.is_some());
        assert!(outcome.results[1].response.is_some());
    }

    #[tokio::test]
    async fn test_unknown_model_recorded_as_role_error() {
        let (_registry, coordinator) = setup();
        let roles = vec![AgentAssignment::new("ghost", "seer")];

        let outcome = coordinator.coordinate("task", &Value::Null, &roles).await;
        assert!(!outcome.success);
        assert!(outcome.results[0].error.as_ref().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_memory_bounded_to_max_turns() {
        let registry = Arc::new(ModelRegistry::new(Arc::new(FactoryRegistry::with_defaults())));
        registry
            .register(RegistryEntry::new("m1", "mock", BackendSettings::new("mock", "m1")))
            .unwrap();
        let coordinator = AgentCoordinator::with_max_memory_turns(registry, 4);
        let roles = vec![AgentAssignment::new("m1", "chatty")];

        for _ in 0..5 {
            let outcome = coordinator.coordinate("again", &Value::Null, &roles).await;
            assert!(outcome.success);
        }

        // Each run appends 2 turns; the buffer is trimmed to the last 4.
        assert_eq!(coordinator.memory_len("mock", "chatty"), 4);
    }

    #[tokio::test]
    async fn test_memory_keyed_per_provider_and_role() {
        let (_registry, coordinator) = setup();
        let roles = vec![
            AgentAssignment::new("m1", "alpha"),
            AgentAssignment::new("m1", "beta"),
        ];
        coordinator.coordinate("task", &Value::Null, &roles).await;

        assert_eq!(coordinator.memory_len("mock", "alpha"), 2);
        assert_eq!(coordinator.memory_len("mock", "beta"), 2);

        coordinator.clear_agent_memory(Some("mock"), Some("alpha"));
        assert_eq!(coordinator.memory_len("mock", "alpha"), 0);
        assert_eq!(coordinator.memory_len("mock", "beta"), 2);

        coordinator.clear_agent_memory(None, None);
        assert_eq!(coordinator.memory_len("mock", "beta"), 0);
    }

    #[tokio::test]
    async fn test_context_included_in_prompt() {
        let (_registry, coordinator) = setup();
        let roles = vec![AgentAssignment::new("m1", "solo")];
        let context = json!({"region": "eu-west"});

        let outcome = coordinator.coordinate("task", &context, &roles).await;
        assert!(outcome.results[0].response.as_ref().unwrap().contains("eu-west"));
    }
}
