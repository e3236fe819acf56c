//! Types for the task routing system.

use crate::registry::entry::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of AI operation a task requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// General reasoning / text generation.
    Reasoning,
    /// Image understanding.
    Vision,
    /// Audio understanding.
    Audio,
    /// Embedding generation.
    Embedding,
    /// Retrieval-augmented generation.
    Rag,
    /// Structured function/tool calling.
    Function,
    /// Coordinating other agents.
    Supervisor,
}

impl TaskKind {
    /// The capability set a task of this kind requires.
    ///
    /// The mapping is fixed: reasoning→{reasoning}; vision→{vision,
    /// multimodal}; audio→{audio}; embedding→{embeddings}; rag→{embeddings,
    /// reasoning}; function→{function_calling, reasoning};
    /// supervisor→{reasoning}.
    #[must_use]
    pub fn required_capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::default();
        match self {
            TaskKind::Reasoning | TaskKind::Supervisor => caps.reasoning = true,
            TaskKind::Vision => {
                caps.vision = true;
                caps.multimodal = true;
            }
            TaskKind::Audio => caps.audio = true,
            TaskKind::Embedding => caps.embeddings = true,
            TaskKind::Rag => {
                caps.embeddings = true;
                caps.reasoning = true;
            }
            TaskKind::Function => {
                caps.function_calling = true;
                caps.reasoning = true;
            }
        }
        caps
    }

    /// Parses a task kind from a string; unknown kinds default to
    /// `Reasoning`.
    #[must_use]
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "vision" => TaskKind::Vision,
            "audio" => TaskKind::Audio,
            "embedding" => TaskKind::Embedding,
            "rag" => TaskKind::Rag,
            "function" => TaskKind::Function,
            "supervisor" => TaskKind::Supervisor,
            _ => TaskKind::Reasoning,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Reasoning => "reasoning",
            TaskKind::Vision => "vision",
            TaskKind::Audio => "audio",
            TaskKind::Embedding => "embedding",
            TaskKind::Rag => "rag",
            TaskKind::Function => "function",
            TaskKind::Supervisor => "supervisor",
        };
        write!(f, "{name}")
    }
}

/// Global routing preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Prefer entries running locally.
    pub prefer_local: bool,
    /// Prefer entries running in the cloud.
    pub prefer_cloud: bool,
    /// Penalize expensive entries when scoring.
    pub cost_optimization: bool,
    /// Penalize slow entries when scoring.
    pub speed_optimization: bool,
}

/// Per-request routing options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// The task kind being routed. `None` defaults to reasoning.
    pub task: Option<TaskKind>,
    /// Required context window, in tokens.
    pub context_length: u32,
    /// Route to a local, offline-capable entry if one is healthy.
    pub require_private: bool,
    /// Extra capability flags beyond the task kind's fixed mapping.
    pub extra_capabilities: CapabilitySet,
    /// Override the router's cost-optimization preference for this request.
    pub cost_optimization: Option<bool>,
    /// Override the router's speed-optimization preference for this request.
    pub speed_optimization: Option<bool>,
}

impl RouteOptions {
    /// Options for a task of the given kind.
    #[must_use]
    pub fn for_task(task: TaskKind) -> Self {
        Self { task: Some(task), ..Self::default() }
    }

    /// The effective task kind (unknown/unspecified defaults to reasoning).
    #[must_use]
    pub fn task_kind(&self) -> TaskKind {
        self.task.unwrap_or(TaskKind::Reasoning)
    }
}

/// The outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The chosen entry id.
    pub model_id: String,
    /// The chosen entry's provider.
    pub provider: String,
    /// Confidence in the decision (0-1).
    pub confidence: f64,
    /// Human-readable reason for the selection.
    pub reason: String,
    /// Ordered fallback entry ids, each enabled and healthy at decision
    /// time; never contains `model_id`.
    pub fallback_chain: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_capabilities_mapping() {
        assert!(TaskKind::Reasoning.required_capabilities().reasoning);

        let vision = TaskKind::Vision.required_capabilities();
        assert!(vision.vision && vision.multimodal && !vision.reasoning);

        let rag = TaskKind::Rag.required_capabilities();
        assert!(rag.embeddings && rag.reasoning);

        let function = TaskKind::Function.required_capabilities();
        assert!(function.function_calling && function.reasoning);

        assert!(TaskKind::Supervisor.required_capabilities().reasoning);
        assert!(TaskKind::Audio.required_capabilities().audio);
        assert!(TaskKind::Embedding.required_capabilities().embeddings);
    }

    #[test]
    fn test_unknown_kind_defaults_to_reasoning() {
        assert_eq!(TaskKind::parse_or_default("summarization"), TaskKind::Reasoning);
        assert_eq!(TaskKind::parse_or_default("RAG"), TaskKind::Rag);
        assert_eq!(TaskKind::parse_or_default("vision"), TaskKind::Vision);
    }

    #[test]
    fn test_route_options_default_task() {
        assert_eq!(RouteOptions::default().task_kind(), TaskKind::Reasoning);
        assert_eq!(RouteOptions::for_task(TaskKind::Audio).task_kind(), TaskKind::Audio);
    }
}
