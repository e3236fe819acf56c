//! Pipeline executor: dependency-ordered execution of task steps with mixed
//! parallel/sequential scheduling.
//!
//! Execution repeatedly computes the ready subset (steps whose dependencies
//! have all executed). Within one subset, steps marked `parallel` fan out
//! concurrently under a semaphore; the rest run one at a time in listed
//! order. Failures are isolated per step: execution continues through all
//! reachable steps and the outcome reports every step, so the call itself
//! never fails.

use crate::registry::ModelRegistry;
use crate::routing::{RouteOptions, TaskKind, TaskRouter};
use conflux_abstraction::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One step in a pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step id, referenced by dependencies and `{{id}}` placeholders.
    pub id: String,
    /// Target entry id; `None` routes automatically for the task kind.
    #[serde(default)]
    pub model: Option<String>,
    /// The task kind dispatched for this step.
    pub task: TaskKind,
    /// Step input; strings may reference prior results via `{{step-id}}`.
    pub input: Value,
    /// Ids of steps that must execute before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this step may run concurrently with other ready parallel
    /// steps.
    #[serde(default)]
    pub parallel: bool,
    /// Optional per-step timeout in milliseconds. No default is enforced.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PipelineStep {
    /// Creates a step with the given id, task kind, and input.
    #[must_use]
    pub fn new(id: impl Into<String>, task: TaskKind, input: Value) -> Self {
        Self {
            id: id.into(),
            model: None,
            task,
            input,
            dependencies: Vec::new(),
            parallel: false,
            timeout_ms: None,
        }
    }

    /// Targets a specific entry instead of automatic routing.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Declares dependencies on other step ids.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Marks the step as parallel.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets a per-step timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// The recorded result of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// The step id.
    pub id: String,
    /// Whether the step produced a value.
    pub success: bool,
    /// The produced value, when successful.
    pub value: Option<Value>,
    /// The failure message, when unsuccessful.
    pub error: Option<String>,
    /// Wall-clock duration of the step, in milliseconds.
    pub duration_ms: u64,
}

/// The outcome of a pipeline run. Always returned, never thrown: per-step
/// failures are recorded in `results` and reflected in `success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    /// True only if every step succeeded and the graph was executable.
    pub success: bool,
    /// Per-step results in completion order.
    pub results: Vec<StepResult>,
    /// The value of the last completed step.
    pub final_value: Option<Value>,
    /// Set when the graph itself was not executable (cycle or missing
    /// dependency).
    pub error: Option<String>,
}

/// Executor for pipeline graphs.
pub struct PipelineExecutor {
    registry: Arc<ModelRegistry>,
    router: Arc<TaskRouter>,
    /// Bounds parallel-step fan-out.
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor").finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    /// Default cap on concurrently running parallel steps.
    pub const DEFAULT_MAX_PARALLEL: usize = 8;

    /// Creates an executor over the given registry and router.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, router: Arc<TaskRouter>) -> Self {
        Self::with_max_parallel(registry, router, Self::DEFAULT_MAX_PARALLEL)
    }

    /// Creates an executor with an explicit parallel-step cap.
    #[must_use]
    pub fn with_max_parallel(
        registry: Arc<ModelRegistry>,
        router: Arc<TaskRouter>,
        max_parallel: usize,
    ) -> Self {
        Self { registry, router, semaphore: Arc::new(Semaphore::new(max_parallel.max(1))) }
    }

    /// Executes a pipeline graph to completion.
    ///
    /// Always returns an outcome; a graph that cannot make progress (cycle
    /// or dependency on an unknown step) stops with the partial results and
    /// an error message instead of hanging.
    pub async fn execute(&self, steps: &[PipelineStep]) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        info!(%run_id, steps = steps.len(), "Pipeline execution starting");

        let mut pending: Vec<PipelineStep> = steps.to_vec();
        let mut executed: HashSet<String> = HashSet::new();
        let mut values: HashMap<String, Value> = HashMap::new();
        let mut results: Vec<StepResult> = Vec::new();
        let mut final_value: Option<Value> = None;

        while !pending.is_empty() {
            let (ready, rest): (Vec<PipelineStep>, Vec<PipelineStep>) = pending
                .into_iter()
                .partition(|step| step.dependencies.iter().all(|dep| executed.contains(dep)));
            pending = rest;

            if ready.is_empty() {
                let stuck: Vec<String> = pending.iter().map(|step| step.id.clone()).collect();
                warn!(%run_id, stuck = ?stuck, "Pipeline cannot make progress");
                let success = false;
                return PipelineOutcome {
                    success,
                    results,
                    final_value,
                    error: Some(format!(
                        "dependency cycle or missing dependency among steps: {}",
                        stuck.join(", ")
                    )),
                };
            }

            let (parallel_steps, sequential_steps): (Vec<PipelineStep>, Vec<PipelineStep>) =
                ready.into_iter().partition(|step| step.parallel);

            // Parallel subset: fan out together, each failure isolated. Inputs
            // are substituted against results from prior subsets only.
            if !parallel_steps.is_empty() {
                let batch = futures::future::join_all(parallel_steps.iter().map(|step| {
                    let input = substitute_placeholders(&step.input, &values);
                    async move {
                        let _permit = self.semaphore.acquire().await.ok();
                        self.run_step(step, input).await
                    }
                }))
                .await;
                for result in batch {
                    Self::record(result, &mut executed, &mut values, &mut results, &mut final_value);
                }
            }

            // Sequential subset: one at a time in listed order; later steps
            // see siblings' fresh results during substitution.
            for step in &sequential_steps {
                let input = substitute_placeholders(&step.input, &values);
                let result = self.run_step(step, input).await;
                Self::record(result, &mut executed, &mut values, &mut results, &mut final_value);
            }
        }

        let success = results.iter().all(|result| result.success);
        info!(%run_id, success, steps = results.len(), "Pipeline execution finished");
        PipelineOutcome { success, results, final_value, error: None }
    }

    fn record(
        result: StepResult,
        executed: &mut HashSet<String>,
        values: &mut HashMap<String, Value>,
        results: &mut Vec<StepResult>,
        final_value: &mut Option<Value>,
    ) {
        executed.insert(result.id.clone());
        if let Some(ref value) = result.value {
            values.insert(result.id.clone(), value.clone());
        }
        final_value.clone_from(&result.value);
        results.push(result);
    }

    /// Runs one step, applying its optional timeout and capturing any error
    /// as a failed result.
    async fn run_step(&self, step: &PipelineStep, input: Value) -> StepResult {
        debug!(step_id = %step.id, task = %step.task, parallel = step.parallel, "Running step");
        let started = Instant::now();

        let outcome = match step.timeout_ms {
            Some(timeout_ms) => {
                let deadline = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(deadline, self.dispatch(step, &input)).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("step timed out after {timeout_ms}ms")),
                }
            }
            None => self.dispatch(step, &input).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => StepResult {
                id: step.id.clone(),
                success: true,
                value: Some(value),
                error: None,
                duration_ms,
            },
            Err(error) => {
                warn!(step_id = %step.id, %error, "Step failed");
                StepResult {
                    id: step.id.clone(),
                    success: false,
                    value: None,
                    error: Some(error),
                    duration_ms,
                }
            }
        }
    }

    /// Resolves the step's target backend and dispatches by task kind.
    async fn dispatch(&self, step: &PipelineStep, input: &Value) -> Result<Value, String> {
        let model_id = match step.model {
            Some(ref id) => id.clone(),
            None => self
                .router
                .route_task(&RouteOptions::for_task(step.task))
                .map_err(|e| e.to_string())?
                .model_id,
        };
        let backend = self.registry.resolve(Some(&model_id)).map_err(|e| e.to_string())?;

        match step.task {
            TaskKind::Embedding => {
                let vectors = backend
                    .generate_embeddings(&[value_to_text(input)], None)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!(vectors))
            }
            TaskKind::Vision | TaskKind::Audio => {
                let response = backend
                    .multimodal_completion(&[ChatMessage::user(value_to_text(input))], None)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Value::String(response.content))
            }
            _ => {
                let response = backend
                    .chat_completion(&[ChatMessage::user(value_to_text(input))], None)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Value::String(response.content))
            }
        }
    }
}

/// Recursively replaces `{{step-id}}` placeholders through strings, arrays,
/// and objects. Placeholders with no prior result are left verbatim.
#[must_use]
pub fn substitute_placeholders(value: &Value, results: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(text) => {
            let mut substituted = text.clone();
            for (id, result) in results {
                let placeholder = format!("{{{{{id}}}}}");
                if substituted.contains(&placeholder) {
                    substituted = substituted.replace(&placeholder, &value_to_text(result));
                }
            }
            Value::String(substituted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| substitute_placeholders(item, results)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute_placeholders(item, results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Renders a JSON value as plain text for a backend prompt.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
