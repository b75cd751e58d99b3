//! Linear execution, ordering guarantees, usage accounting, resume, and
//! cancellation.

mod common;

use common::provider::{FailKind, MockProvider, Scripted};
use common::{completion, finished_nodes, run_collect, tokens_for};
use loomflow::errors::ErrorCode;
use loomflow::event_bus::Event;
use loomflow::runtime::{CancelToken, ExecutionOptions, ResumeState};
use rustc_hash::FxHashMap;

#[tokio::test]
async fn test_linear_event_sequence() {
    let workflow = common::fixtures::linear("m1");
    let provider = MockProvider::scripted([Scripted::text("echoed hello")]);
    let (result, events) = run_collect(
        &workflow,
        "hello",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert_eq!(result.final_output, "echoed hello");
    assert_eq!(result.execution_order, vec!["start-1", "agent-1"]);
    assert_eq!(result.output_of("start-1"), Some("hello"));
    assert_eq!(result.output_of("agent-1"), Some("echoed hello"));

    // Start events precede agent events; tokens precede the agent finish.
    assert_eq!(finished_nodes(&events), vec!["start-1", "agent-1"]);
    assert_eq!(tokens_for(&events, "agent-1"), "echoed hello");
    let agent_first_token = events
        .iter()
        .position(|e| matches!(e, Event::Token { .. }))
        .unwrap();
    let agent_finish = events
        .iter()
        .position(|e| matches!(e, Event::NodeFinish { node_id, .. } if node_id == "agent-1"))
        .unwrap();
    assert!(agent_first_token < agent_finish);

    let (success, final_output) = completion(&events);
    assert!(success);
    assert_eq!(final_output, "echoed hello");
}

#[tokio::test]
async fn test_node_outputs_defined_for_execution_order() {
    let workflow = common::fixtures::linear_with_output("m1");
    let provider = MockProvider::scripted([Scripted::text("done")]);
    let (result, _) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert_eq!(result.execution_order[0], "start-1");
    for node in &result.execution_order {
        assert!(
            result.node_outputs.contains_key(node),
            "missing output for executed node {node}"
        );
    }
    assert_eq!(result.final_node_id.as_deref(), Some("out-1"));
}

#[tokio::test]
async fn test_terminal_tokens_surface_as_workflow_tokens() {
    let workflow = common::fixtures::linear_with_output("m1");
    let provider = MockProvider::scripted([Scripted::text("final words")]);
    let (_, events) = run_collect(&workflow, "go", provider, ExecutionOptions::default()).await;

    let workflow_tokens: String = events
        .iter()
        .filter_map(|e| match e {
            Event::WorkflowToken { delta, .. } => Some(delta.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(workflow_tokens, "final words");
}

#[tokio::test]
async fn test_usage_is_aggregated() {
    let workflow = common::fixtures::linear("m1");
    let provider = MockProvider::scripted([Scripted::text("out")]);
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    let usage = result.usage.expect("usage reported");
    assert_eq!(usage.prompt_tokens, 10);
    assert_eq!(usage.completion_tokens, 5);
    assert_eq!(result.token_usage_details.len(), 1);
    assert_eq!(result.token_usage_details[0].node_id, "agent-1");
    assert!(events.iter().any(|e| matches!(
        e,
        Event::TokenUsage { node_id, remaining_context: Some(_), .. } if node_id == "agent-1"
    )));
}

#[tokio::test]
async fn test_empty_attachments_behave_like_omitted() {
    let workflow = common::fixtures::linear("m1");

    let provider_a = MockProvider::scripted([Scripted::text("same")]);
    let (result_a, _) = run_collect(
        &workflow,
        "input",
        provider_a.clone(),
        ExecutionOptions::default(),
    )
    .await;

    let provider_b = MockProvider::scripted([Scripted::text("same")]);
    let input = loomflow::message::ExecutionInput {
        text: "input".into(),
        attachments: Vec::new(),
    };
    let (result_b, _) = run_collect(
        &workflow,
        input,
        provider_b.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert_eq!(result_a.final_output, result_b.final_output);
    assert_eq!(provider_a.calls()[0].messages, provider_b.calls()[0].messages);
}

#[tokio::test]
async fn test_retry_law_exact_invocations() {
    // maxRetries = 2 and persistent failure: exactly 3 provider calls.
    let workflow = loomflow::workflow::WorkflowData::new("retry")
        .with_node(loomflow::workflow::WorkflowNode::new(
            "start-1",
            loomflow::workflow::node_type::START,
            serde_json::json!({}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "agent-1",
            loomflow::workflow::node_type::AGENT,
            serde_json::json!({
                "model": "m1",
                "prompt": "p",
                "errorHandling": {"retry": {"maxRetries": 2, "baseDelayMs": 1}}
            }),
        ))
        .with_edge(loomflow::workflow::WorkflowEdge::new(
            "e1", "start-1", "agent-1",
        ));
    let provider = MockProvider::scripted([
        Scripted::Fail(FailKind::Network),
        Scripted::Fail(FailKind::Network),
        Scripted::Fail(FailKind::Network),
    ]);
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(!result.success);
    assert_eq!(provider.call_count(), 3);
    let error = result.error.expect("structured error");
    assert_eq!(error.code, ErrorCode::Network);
    assert_eq!(error.retries.len(), 2);
    assert!(events.iter().any(|e| matches!(e, Event::NodeError { .. })));
}

#[tokio::test]
async fn test_auth_failures_are_never_retried() {
    let workflow = common::fixtures::linear("m1");
    let provider = MockProvider::scripted([Scripted::Fail(FailKind::Auth)]);
    let (result, _) = run_collect(
        &workflow,
        "go",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(!result.success);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(result.error.unwrap().code, ErrorCode::Auth);
}

#[tokio::test]
async fn test_cancellation_before_start() {
    let workflow = common::fixtures::linear("m1");
    let provider = MockProvider::scripted([Scripted::text("never")]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default().with_cancel(cancel),
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, ErrorCode::Cancelled);
    // No node may finish after stop(), and at most one CANCELLED node error.
    assert!(finished_nodes(&events).is_empty());
    let cancelled_errors = events
        .iter()
        .filter(|e| {
            matches!(e, Event::NodeError { payload, .. } if payload.code == ErrorCode::Cancelled)
        })
        .count();
    assert!(cancelled_errors <= 1);
}

#[tokio::test]
async fn test_resume_skips_seeded_nodes() {
    let workflow = common::fixtures::linear_with_output("m1");
    let provider = MockProvider::scripted([Scripted::text("resumed answer")]);

    let mut node_outputs = FxHashMap::default();
    node_outputs.insert("start-1".to_string(), "hello".to_string());
    let options = ExecutionOptions::default().with_resume(ResumeState {
        start_node_id: "agent-1".into(),
        node_outputs,
        session_messages: Vec::new(),
    });

    let (result, events) = run_collect(&workflow, "hello", provider.clone(), options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "resumed answer");
    // The seeded start node is not re-executed.
    assert!(!finished_nodes(&events).contains(&"start-1".to_string()));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_validation_preflight_blocks_execution() {
    // Two start nodes: invalid.
    let workflow = loomflow::workflow::WorkflowData::new("bad")
        .with_node(loomflow::workflow::WorkflowNode::new(
            "s1",
            loomflow::workflow::node_type::START,
            serde_json::json!({}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "s2",
            loomflow::workflow::node_type::START,
            serde_json::json!({}),
        ));
    let provider = MockProvider::new();
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, ErrorCode::Validation);
    assert_eq!(provider.call_count(), 0);
    let (success, _) = completion(&events);
    assert!(!success);
}
