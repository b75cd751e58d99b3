//! While-loop iteration, condition evaluation, and the iteration cap.

mod common;

use common::provider::{MockProvider, Scripted};
use common::run_collect;
use loomflow::event_bus::Event;
use loomflow::runtime::ExecutionOptions;

fn loop_iterations(events: &[Event]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::LoopIteration { iteration, .. } => Some(*iteration),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_loop_runs_until_condition_done() {
    let workflow = common::fixtures::refine_loop("m1", 3, "continue");
    let provider = MockProvider::scripted([
        Scripted::text("a very long draft that keeps going"), // body, iteration 1
        Scripted::text("continue"),                           // condition after iter 1
        Scripted::text("short draft"),                        // body, iteration 2
        Scripted::text("done"),                               // condition after iter 2
    ]);
    let (result, events) = run_collect(
        &workflow,
        "write about loops",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert_eq!(result.final_output, "short draft");
    assert_eq!(result.final_node_id.as_deref(), Some("out-1"));
    // Iterations are 1-based, strictly increasing, and within the cap.
    assert_eq!(loop_iterations(&events), vec![1, 2]);
    assert_eq!(provider.call_count(), 4);
    // The second body pass received the first pass's output.
    let second_body_call = &provider.calls()[2];
    assert!(
        second_body_call
            .messages
            .last()
            .unwrap()
            .text()
            .contains("a very long draft")
    );
}

#[tokio::test]
async fn test_iteration_cap_with_warning() {
    let workflow = common::fixtures::refine_loop("m1", 2, "warning");
    let provider = MockProvider::scripted([
        Scripted::text("draft one"),
        Scripted::text("continue"),
        Scripted::text("draft two"),
        Scripted::text("continue"), // cap reached before done
    ]);
    let (result, events) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert_eq!(loop_iterations(&events), vec![1, 2]);
    assert!(result.final_output.starts_with("draft two"));
    assert!(result.final_output.contains("iteration cap reached"));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Diagnostic { scope, .. } if scope == "loop"
    )));
}

#[tokio::test]
async fn test_iteration_cap_with_error() {
    let workflow = common::fixtures::refine_loop("m1", 1, "error");
    let provider = MockProvider::scripted([
        Scripted::text("draft"),
        Scripted::text("continue"),
    ]);
    let (result, _) = run_collect(&workflow, "go", provider, ExecutionOptions::default()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.unwrap().code,
        loomflow::errors::ErrorCode::InfiniteLoop
    );
}

#[tokio::test]
async fn test_zero_iterations_exits_immediately_via_done() {
    let workflow = common::fixtures::refine_loop("m1", 0, "continue");
    let provider = MockProvider::new();
    let (result, events) = run_collect(
        &workflow,
        "untouched input",
        provider.clone(),
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    // Body never ran; the loop passed its input through the done port.
    assert_eq!(result.final_output, "untouched input");
    assert_eq!(provider.call_count(), 0);
    assert!(loop_iterations(&events).is_empty());
    assert!(!result.node_outputs.contains_key("refine-1"));
}

#[tokio::test]
async fn test_custom_evaluator_replaces_llm_condition() {
    use async_trait::async_trait;
    use loomflow::extensions::{EvaluatorInput, LoopEvaluator};
    use std::sync::Arc;

    struct TwoPasses;

    #[async_trait]
    impl LoopEvaluator for TwoPasses {
        async fn should_continue(
            &self,
            input: EvaluatorInput,
        ) -> Result<bool, loomflow::errors::ExecutionError> {
            Ok(input.iteration < 2)
        }
    }

    let workflow = loomflow::workflow::WorkflowData::new("custom-loop")
        .with_node(loomflow::workflow::WorkflowNode::new(
            "start-1",
            loomflow::workflow::node_type::START,
            serde_json::json!({}),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "loop-1",
            loomflow::workflow::node_type::WHILE_LOOP,
            serde_json::json!({
                "conditionPrompt": "unused",
                "maxIterations": 5,
                "customEvaluator": "two-passes"
            }),
        ))
        .with_node(loomflow::workflow::WorkflowNode::new(
            "refine-1",
            loomflow::workflow::node_type::AGENT,
            serde_json::json!({"model": "m1", "prompt": "Refine"}),
        ))
        .with_edge(loomflow::workflow::WorkflowEdge::new(
            "e1", "start-1", "loop-1",
        ))
        .with_edge(
            loomflow::workflow::WorkflowEdge::new("e2", "loop-1", "refine-1").with_handle("body"),
        )
        .with_edge(loomflow::workflow::WorkflowEdge::new(
            "e3", "refine-1", "loop-1",
        ));
    let provider = MockProvider::scripted([
        Scripted::text("pass one"),
        Scripted::text("pass two"),
    ]);
    let options =
        ExecutionOptions::default().with_evaluator("two-passes", Arc::new(TwoPasses));
    let (result, events) = run_collect(&workflow, "go", provider.clone(), options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "pass two");
    assert_eq!(loop_iterations(&events), vec![1, 2]);
    // Two body calls, zero condition calls.
    assert_eq!(provider.call_count(), 2);
}
