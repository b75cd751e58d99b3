//! Error-branch routing: failures serialized down the `error` handle.

mod common;

use common::provider::{FailKind, MockProvider, Scripted};
use common::{finished_nodes, run_collect};
use loomflow::errors::{ErrorCode, NodeErrorPayload};
use loomflow::event_bus::Event;
use loomflow::runtime::ExecutionOptions;

#[tokio::test]
async fn test_error_routes_to_fallback_agent() {
    let workflow = common::fixtures::error_branch("m1");
    let provider = MockProvider::scripted([
        Scripted::Fail(FailKind::Network),
        Scripted::text("recovered"),
    ]);
    let (result, events) = run_collect(
        &workflow,
        "primary input",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    // The primary node errored, the fallback ran, and the run succeeded.
    assert!(result.success);
    assert_eq!(result.final_output, "recovered");
    assert!(events.iter().any(|e| matches!(
        e,
        Event::NodeError { node_id, payload } if node_id == "agent-1" && payload.code == ErrorCode::Network
    )));
    assert!(finished_nodes(&events).contains(&"fallback-1".to_string()));

    // The fallback received the serialized error context as its input.
    let fallback_call = provider.calls().into_iter().last().unwrap();
    let fallback_input = fallback_call.messages.last().unwrap().text();
    let payload: NodeErrorPayload =
        serde_json::from_str(&fallback_input).expect("error context is JSON");
    assert_eq!(payload.code, ErrorCode::Network);
    assert_eq!(payload.node_id, "agent-1");
}

#[tokio::test]
async fn test_stop_mode_terminates_without_error_edge() {
    // Same failure, no error edge: the run fails.
    let workflow = common::fixtures::linear("m1");
    let provider = MockProvider::scripted([Scripted::Fail(FailKind::Network)]);
    let options = ExecutionOptions {
        max_retries: 0,
        ..ExecutionOptions::default()
    };
    let (result, events) = run_collect(&workflow, "go", provider, options).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, ErrorCode::Network);
    let (success, _) = common::completion(&events);
    assert!(!success);
}

#[tokio::test]
async fn test_continue_mode_swallows_failures() {
    let workflow = loomflow::workflow::WorkflowData::new("continue-mode")
        .with_node(loomflow::workflow::WorkflowNode::new(
            "start-1",
            loomflow::workflow::node_type::START,
            serde_json::json!({}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "flaky-1",
            loomflow::workflow::node_type::AGENT,
            serde_json::json!({
                "model": "m1",
                "prompt": "p",
                "errorHandling": {"mode": "continue", "retry": {"maxRetries": 0}}
            }),
        ))
        .with_edge(loomflow::workflow::WorkflowEdge::new(
            "e1", "start-1", "flaky-1",
        ));
    let provider = MockProvider::scripted([Scripted::Fail(FailKind::Network)]);
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    // The node errored but the execution completed.
    assert!(result.success);
    assert!(events.iter().any(|e| matches!(e, Event::NodeError { .. })));
    assert!(!result.node_outputs.contains_key("flaky-1"));
}
