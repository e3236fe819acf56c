//! End-to-end tests for the control plane: routing arithmetic against
//! literal entries, fallback invariants, pipelines, and coordination through
//! the façade.

use conflux_backends::BackendSettings;
use conflux_core::{
    AgentAssignment, CapabilitySet, ControlPlane, ControlPlaneConfig, HealthState, HealthUpdate,
    PipelineStep, RegistryEntry, RouteOptions, TaskKind, TaskOptions, TaskRouter,
};
use serde_json::json;
use std::sync::Arc;

fn mock_entry(id: &str) -> RegistryEntry {
    RegistryEntry::new(id, "mock", BackendSettings::new("mock", id))
}

/// Two reasoning entries, priced and prioritized per the worked routing
/// example: cost optimization flips the winner relative to priority-only
/// scoring when the arithmetic says so.
#[tokio::test]
async fn routing_example_cost_vs_priority() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    let registry = plane.registry();
    registry
        .register(mock_entry("fast-cheap").with_priority(1).with_cost(0.001, 0.001))
        .unwrap();
    registry
        .register(mock_entry("strong-expensive").with_priority(5).with_cost(0.01, 0.01))
        .unwrap();

    let router = TaskRouter::new(Arc::clone(registry));

    // Cost optimization: fast-cheap scores 100 - 0.1 - 1.0 = 98.9 against
    // strong-expensive's 100 - 0.5 - 10.0 = 89.5.
    let cost_routed = router
        .route_task(&RouteOptions {
            cost_optimization: Some(true),
            ..RouteOptions::for_task(TaskKind::Reasoning)
        })
        .unwrap();
    assert_eq!(cost_routed.model_id, "fast-cheap");

    // Without optimization only priority differs: 99.9 vs 99.5, so
    // strong-expensive's score never exceeds fast-cheap's.
    let plain = router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();
    assert_eq!(plain.model_id, "fast-cheap");
}

#[tokio::test]
async fn fallback_chain_entries_are_healthy_and_exclude_choice() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    let registry = plane.registry();
    registry
        .register(mock_entry("primary").with_fallback_to(vec![
            "backup".to_string(),
            "broken".to_string(),
            "primary".to_string(),
        ]))
        .unwrap();
    registry.register(mock_entry("backup")).unwrap();
    registry.register(mock_entry("broken")).unwrap();
    registry.update_health("broken", HealthUpdate::state(HealthState::Down)).unwrap();

    let router = TaskRouter::new(Arc::clone(registry));
    let decision = router.route_task(&RouteOptions::for_task(TaskKind::Reasoning)).unwrap();

    assert!(!decision.fallback_chain.contains(&decision.model_id));
    for id in &decision.fallback_chain {
        let entry = registry.get(id).unwrap();
        let health = registry.health(id).unwrap();
        assert!(entry.enabled);
        assert!(health.is_healthy());
    }
    assert!(!decision.fallback_chain.contains(&"broken".to_string()));
}

#[tokio::test]
async fn facade_task_flow_caches_and_meters() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    plane
        .registry()
        .register(mock_entry("workhorse").with_cost(0.000_01, 0.000_02))
        .unwrap();

    let options = TaskOptions::new(TaskKind::Reasoning, json!("summarize the minutes"));

    let first = plane.execute_task(&options).await.unwrap();
    assert!(!first.cached);
    let second = plane.execute_task(&options).await.unwrap();
    assert!(second.cached);
    assert_eq!(first.value, second.value);

    // Only the uncached execution recorded a metric.
    assert_eq!(plane.registry().cost_history("workhorse").len(), 1);
    assert!(plane.total_cost(None) > 0.0);
    assert_eq!(plane.cache_stats().size, 1);
}

#[tokio::test]
async fn pipeline_through_facade_with_mixed_scheduling() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    let mut caps = CapabilitySet::reasoning();
    caps.embeddings = true;
    plane.registry().register(mock_entry("all-round").with_capabilities(caps)).unwrap();

    let steps = vec![
        PipelineStep::new("fetch-a", TaskKind::Reasoning, json!("load part a")).with_parallel(true),
        PipelineStep::new("fetch-b", TaskKind::Reasoning, json!("load part b")).with_parallel(true),
        PipelineStep::new("merge", TaskKind::Reasoning, json!("combine {{fetch-a}} and {{fetch-b}}"))
            .with_dependencies(vec!["fetch-a".to_string(), "fetch-b".to_string()]),
        PipelineStep::new("index", TaskKind::Embedding, json!("{{merge}}"))
            .with_dependencies(vec!["merge".to_string()]),
    ];

    let outcome = plane.execute_pipeline(&steps).await;
    assert!(outcome.success);
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(outcome.results.last().unwrap().id, "index");
    // Terminal value is the embedding step's vector output.
    assert!(outcome.final_value.unwrap().is_array());
}

#[tokio::test]
async fn coordination_through_facade_reports_every_role() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    plane.registry().register(mock_entry("m1")).unwrap();

    let mut broken = BackendSettings::new("mock", "m2");
    broken.extra = json!({"fail": "backend offline"});
    plane.registry().register(RegistryEntry::new("m2", "mock", broken)).unwrap();

    let roles = vec![
        AgentAssignment::new("m1", "drafter"),
        AgentAssignment::new("m2", "reviewer"),
        AgentAssignment::new("m1", "publisher"),
    ];
    let outcome = plane.coordinate_agents("ship the release notes", &json!(null), &roles).await;

    assert!(!outcome.success);
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results[0].response.is_some());
    assert!(outcome.results[1].error.is_some());
    // The failing reviewer did not abort the publisher.
    assert!(outcome.results[2].response.is_some());
}

#[tokio::test]
async fn health_monitor_writes_back_through_facade() {
    let plane = ControlPlane::new(ControlPlaneConfig::default()).unwrap();
    plane.registry().register(mock_entry("steady")).unwrap();
    plane
        .registry()
        .register(mock_entry("flaky").with_health_check("http://127.0.0.1:1/health"))
        .unwrap();

    plane.check_all_models().await;

    let overall = plane.overall_health();
    assert_eq!(overall.total, 2);
    assert_eq!(overall.healthy, 1);
    assert_eq!(overall.down, 1);

    // The down entry is no longer routable; the steady one serves.
    let outcome = plane
        .execute_task(&TaskOptions::new(TaskKind::Reasoning, json!("hi")).with_model("flaky"))
        .await
        .unwrap();
    assert_eq!(outcome.model_id, "steady");
}

#[tokio::test]
async fn config_driven_construction() {
    let text = r#"
        default_model = "brain"

        [[models]]
        id = "brain"
        provider = "mock"
        priority = 1

        [[models]]
        id = "spare"
        provider = "mock"
        priority = 9
    "#;
    let config = ControlPlaneConfig::from_toml_str(text).unwrap();
    let plane = ControlPlane::new(config).unwrap();

    assert_eq!(plane.registry().count(), 2);
    let outcome = plane
        .execute_task(&TaskOptions { input: json!("default route"), ..TaskOptions::default() })
        .await
        .unwrap();
    assert_eq!(outcome.model_id, "brain");
}
