//! Demo: wire up a control plane against mock backends and run a task, a
//! pipeline, and a coordination round.
//!
//! Run with: `cargo run -p conflux-core --example control_plane`

use conflux_backends::BackendSettings;
use conflux_core::{
    AgentAssignment, ControlPlane, ControlPlaneConfig, PipelineStep, RegistryEntry, TaskKind,
    TaskOptions,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ControlPlaneConfig::from_toml_str(
        r#"
        default_model = "workhorse"

        [router]
        cost_optimization = true
    "#,
    )?;
    let mut plane = ControlPlane::new(config)?;

    plane.registry().register(
        RegistryEntry::new("workhorse", "mock", BackendSettings::new("mock", "workhorse"))
            .with_priority(1)
            .with_cost(0.000_001, 0.000_002),
    )?;
    plane.registry().register(
        RegistryEntry::new("spare", "mock", BackendSettings::new("mock", "spare"))
            .with_priority(5),
    )?;

    plane.start().map_err(anyhow::Error::msg)?;

    let task = plane
        .execute_task(&TaskOptions::new(
            TaskKind::Reasoning,
            json!("Summarize yesterday's deployment"),
        ))
        .await?;
    println!("task -> [{}] {}", task.model_id, task.value);

    let pipeline = plane
        .execute_pipeline(&[
            PipelineStep::new("outline", TaskKind::Reasoning, json!("Outline a runbook")),
            PipelineStep::new("draft", TaskKind::Reasoning, json!("Expand: {{outline}}"))
                .with_dependencies(vec!["outline".to_string()]),
        ])
        .await;
    println!("pipeline success={} steps={}", pipeline.success, pipeline.results.len());

    let coordination = plane
        .coordinate_agents(
            "Review the draft runbook",
            &json!({"audience": "on-call"}),
            &[
                AgentAssignment::new("workhorse", "reviewer"),
                AgentAssignment::new("spare", "approver"),
            ],
        )
        .await;
    println!("coordination success={}", coordination.success);

    println!("health: {:?}", plane.overall_health());
    println!("cache: {:?}", plane.cache_stats());
    println!("total cost: ${:.6}", plane.total_cost(None));

    plane.stop().map_err(anyhow::Error::msg)?;
    Ok(())
}
