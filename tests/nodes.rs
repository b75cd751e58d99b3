//! Memory, tool, and HITL node behavior.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::provider::{MockProvider, Scripted};
use common::{finished_nodes, run_collect};
use loomflow::errors::{ErrorCode, ExecutionError};
use loomflow::hitl::{HitlHandler, HitlRequest, HitlResponse};
use loomflow::memory::{InMemoryStore, MemoryAdapter, MemoryEntry};
use loomflow::runtime::ExecutionOptions;
use loomflow::tools::{FnToolHandler, ToolDefinition, ToolInvocation, ToolRegistry};
use loomflow::workflow::{WorkflowData, WorkflowEdge, WorkflowNode, node_type};
use serde_json::json;

fn single_node_flow(kind: &str, data: serde_json::Value) -> WorkflowData {
    WorkflowData::new("single")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new("node-1", kind, data))
        .with_edge(WorkflowEdge::new("e1", "start-1", "node-1"))
}

fn uppercase_tools() -> ToolRegistry {
    let tools = ToolRegistry::new();
    tools.register(ToolDefinition {
        name: "uppercase".into(),
        description: "Uppercase the input".into(),
        parameters: json!({"type": "object"}),
        handler: Arc::new(FnToolHandler(|inv: ToolInvocation| async move {
            Ok(inv.arguments["input"]
                .as_str()
                .unwrap_or_default()
                .to_uppercase())
        })),
    });
    tools
}

#[tokio::test]
async fn test_memory_store_then_query() {
    let memory: Arc<dyn MemoryAdapter> = Arc::new(InMemoryStore::new());
    memory
        .store(MemoryEntry {
            text: "the deploy window is Tuesday".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let workflow = single_node_flow(node_type::MEMORY, json!({"operation": "query", "limit": 3}));
    let provider = MockProvider::new();
    let options = ExecutionOptions::default().with_memory(memory);
    let (result, _) = run_collect(&workflow, "deploy window", provider, options).await;

    assert!(result.success);
    assert!(result.final_output.contains("deploy window is Tuesday"));
    assert!(result.final_output.starts_with("1."));
}

#[tokio::test]
async fn test_memory_query_fallback_on_empty() {
    let workflow = single_node_flow(
        node_type::MEMORY,
        json!({"operation": "query", "fallback": "nothing remembered"}),
    );
    let provider = MockProvider::new();
    let options =
        ExecutionOptions::default().with_memory(Arc::new(InMemoryStore::new()));
    let (result, _) = run_collect(&workflow, "anything", provider, options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "nothing remembered");
}

#[tokio::test]
async fn test_tool_node_merges_arguments() {
    let workflow = single_node_flow(
        node_type::TOOL,
        json!({"toolId": "uppercase", "arguments": {"style": "loud"}}),
    );
    let provider = MockProvider::new();
    let options = ExecutionOptions::default().with_tools(uppercase_tools());
    let (result, _) = run_collect(&workflow, "make me loud", provider, options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "MAKE ME LOUD");
}

#[tokio::test]
async fn test_tool_node_failure_routes_error_branch_by_default() {
    let tools = ToolRegistry::new();
    tools.register(ToolDefinition {
        name: "broken".into(),
        description: "Always fails".into(),
        parameters: json!({"type": "object"}),
        handler: Arc::new(FnToolHandler(|_inv: ToolInvocation| async move {
            Err::<String, _>(ExecutionError::Other("tool exploded".into()))
        })),
    });
    let workflow = single_node_flow(node_type::TOOL, json!({"toolId": "broken"}))
        .with_node(WorkflowNode::new(
            "cleanup-1",
            node_type::AGENT,
            json!({"model": "m1", "prompt": "Cleanup"}),
        ))
        .with_edge(WorkflowEdge::new("e2", "node-1", "cleanup-1").with_handle("error"));
    let provider = MockProvider::scripted([Scripted::text("cleaned up")]);
    let options = ExecutionOptions::default().with_tools(tools);
    let (result, events) = run_collect(&workflow, "go", provider, options).await;

    // Tool nodes default to branch-on-error.
    assert!(result.success);
    assert_eq!(result.final_output, "cleaned up");
    assert!(events.iter().any(|e| matches!(
        e,
        loomflow::event_bus::Event::NodeError { payload, .. }
            if payload.code == ErrorCode::ToolHandler
    )));
}

#[tokio::test]
async fn test_agent_tool_call_loop() {
    let workflow = single_node_flow(
        node_type::AGENT,
        json!({"model": "m1", "prompt": "Use tools", "tools": ["uppercase"]}),
    );
    let provider = MockProvider::scripted([
        Scripted::ToolCall {
            name: "uppercase".into(),
            arguments: json!({"input": "quiet words"}),
        },
        Scripted::text("the tool said QUIET WORDS"),
    ]);
    let options = ExecutionOptions::default().with_tools(uppercase_tools());
    let (result, _) = run_collect(&workflow, "go", provider.clone(), options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "the tool said QUIET WORDS");
    // Second call carries the assistant tool-call turn plus the tool result.
    let second = &provider.calls()[1];
    let roles: Vec<&str> = second.messages.iter().map(|m| m.role.as_str()).collect();
    assert!(roles.contains(&"tool"));
}

struct ScriptedReviewer {
    response: HitlResponse,
    seen: parking_lot::Mutex<Vec<HitlRequest>>,
}

#[async_trait]
impl HitlHandler for ScriptedReviewer {
    async fn on_request(&self, request: HitlRequest) -> HitlResponse {
        self.seen.lock().push(request);
        self.response.clone()
    }
}

#[tokio::test]
async fn test_hitl_approval_modify_rewrites_input() {
    let workflow = single_node_flow(
        node_type::AGENT,
        json!({
            "model": "m1",
            "prompt": "p",
            "hitl": {"enabled": true, "mode": "approval"}
        }),
    );
    let reviewer = Arc::new(ScriptedReviewer {
        response: HitlResponse::modify("edited input"),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let provider = MockProvider::scripted([Scripted::text("answer")]);
    let options = ExecutionOptions::default().with_hitl(reviewer.clone());
    let (result, _) = run_collect(&workflow, "original input", provider.clone(), options).await;

    assert!(result.success);
    assert_eq!(reviewer.seen.lock().len(), 1);
    // The provider saw the modified input, not the original.
    let call = &provider.calls()[0];
    assert_eq!(call.messages.last().unwrap().text(), "edited input");
}

#[tokio::test]
async fn test_hitl_reject_without_rejected_edge_fails() {
    let workflow = single_node_flow(
        node_type::AGENT,
        json!({
            "model": "m1",
            "prompt": "p",
            "hitl": {"enabled": true, "mode": "approval"}
        }),
    );
    let reviewer = Arc::new(ScriptedReviewer {
        response: HitlResponse::reject(),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let provider = MockProvider::new();
    let options = ExecutionOptions::default().with_hitl(reviewer);
    let (result, _) = run_collect(&workflow, "go", provider.clone(), options).await;

    assert!(!result.success);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_hitl_reject_routes_to_rejected_edge() {
    let workflow = single_node_flow(
        node_type::AGENT,
        json!({
            "model": "m1",
            "prompt": "p",
            "hitl": {"enabled": true, "mode": "review"}
        }),
    )
    .with_node(WorkflowNode::new(
        "handler-1",
        node_type::AGENT,
        json!({"model": "m1", "prompt": "Handle rejection"}),
    ))
    .with_edge(WorkflowEdge::new("e2", "node-1", "handler-1").with_handle("rejected"));
    let reviewer = Arc::new(ScriptedReviewer {
        response: HitlResponse::reject(),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let provider = MockProvider::scripted([
        Scripted::text("draft answer"),
        Scripted::text("handled the rejection"),
    ]);
    let options = ExecutionOptions::default().with_hitl(reviewer);
    let (result, events) = run_collect(&workflow, "go", provider, options).await;

    assert!(result.success);
    assert_eq!(result.final_output, "handled the rejection");
    assert!(finished_nodes(&events).contains(&"handler-1".to_string()));
    assert!(events.iter().any(|e| matches!(
        e,
        loomflow::event_bus::Event::HitlRequested { .. }
    )));
}

#[tokio::test]
async fn test_hitl_skipped_without_handler() {
    let workflow = single_node_flow(
        node_type::AGENT,
        json!({
            "model": "m1",
            "prompt": "p",
            "hitl": {"enabled": true, "mode": "approval"}
        }),
    );
    let provider = MockProvider::scripted([Scripted::text("ran without review")]);
    let (result, _) = run_collect(
        &workflow,
        "go",
        provider,
        ExecutionOptions::default(),
    )
    .await;

    assert!(result.success);
    assert_eq!(result.final_output, "ran without review");
}
