//! Router classification, fallback policy, and single-route shortcut.

mod common;

use common::provider::{MockProvider, Scripted};
use common::{finished_nodes, run_collect};
use loomflow::event_bus::Event;
use loomflow::runtime::ExecutionOptions;
use serde_json::json;

#[tokio::test]
async fn test_selected_route_executes_only() {
    let workflow = common::fixtures::two_route_router("m1");
    let provider = MockProvider::scripted([
        Scripted::text("a"),             // classifier
        Scripted::text("analysis done"), // agent-a
    ]);
    let (result, events) = run_collect(
        &workflow,
        "Do a SWOT analysis",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RouteSelected { node_id, route_id } if node_id == "router-1" && route_id == "a"
    )));
    let finished = finished_nodes(&events);
    assert!(finished.contains(&"agent-a".to_string()));
    assert!(!finished.contains(&"agent-b".to_string()));
    assert!(result.node_outputs.contains_key("agent-a"));
    assert!(!result.node_outputs.contains_key("agent-b"));
}

#[tokio::test]
async fn test_unparseable_answer_falls_back_to_first_route() {
    let workflow = common::fixtures::two_route_router("m1");
    let provider = MockProvider::scripted([
        Scripted::text("neither of those, really"),
        Scripted::text("fell back"),
    ]);
    let (result, events) = run_collect(
        &workflow,
        "ambiguous input",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RouteSelected { route_id, .. } if route_id == "a"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Diagnostic { scope, .. } if scope == "router"
    )));
    assert!(finished_nodes(&events).contains(&"agent-a".to_string()));
}

#[tokio::test]
async fn test_single_route_skips_classifier() {
    let workflow = loomflow::workflow::WorkflowData::new("single-route")
        .with_node(loomflow::workflow::WorkflowNode::new(
            "start-1",
            loomflow::workflow::node_type::START,
            json!({}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "router-1",
            loomflow::workflow::node_type::ROUTER,
            json!({"model": "m1", "routes": [{"id": "only", "label": "Only"}]}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "agent-1",
            loomflow::workflow::node_type::AGENT,
            json!({"model": "m1", "prompt": "p"}),
        ))
        .with_edge(loomflow::workflow::WorkflowEdge::new(
            "e1", "start-1", "router-1",
        ))
        .with_edge(
            loomflow::workflow::WorkflowEdge::new("e2", "router-1", "agent-1")
                .with_handle("route-only"),
        );
    let provider = MockProvider::scripted([Scripted::text("routed")]);
    let (result, events) = run_collect(
        &workflow,
        "whatever the classifier would have said",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    // Only the downstream agent hit the provider.
    assert_eq!(provider.call_count(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RouteSelected { route_id, .. } if route_id == "only"
    )));
}
