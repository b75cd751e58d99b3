//! Workflow fixtures shared across the integration suites.

use serde_json::json;

use loomflow::workflow::{WorkflowData, WorkflowEdge, WorkflowNode, node_type};

/// `start -> agent(model, "Echo")`.
pub fn linear(model: &str) -> WorkflowData {
    WorkflowData::new("linear")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new(
            "agent-1",
            node_type::AGENT,
            json!({"model": model, "prompt": "Echo"}),
        ))
        .with_edge(WorkflowEdge::new("e1", "start-1", "agent-1"))
}

/// `start -> agent -> output`.
pub fn linear_with_output(model: &str) -> WorkflowData {
    linear(model)
        .with_node(WorkflowNode::new("out-1", node_type::OUTPUT, json!({})))
        .with_edge(WorkflowEdge::new("e2", "agent-1", "out-1"))
}

/// `start -> router{a,b}`; `route-a -> agent-a`, `route-b -> agent-b`.
pub fn two_route_router(model: &str) -> WorkflowData {
    WorkflowData::new("router")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new(
            "router-1",
            node_type::ROUTER,
            json!({
                "model": model,
                "routes": [
                    {"id": "a", "label": "Analysis"},
                    {"id": "b", "label": "Creative"}
                ]
            }),
        ))
        .with_node(WorkflowNode::new(
            "agent-a",
            node_type::AGENT,
            json!({"model": model, "prompt": "Analyze"}),
        ))
        .with_node(WorkflowNode::new(
            "agent-b",
            node_type::AGENT,
            json!({"model": model, "prompt": "Create"}),
        ))
        .with_edge(WorkflowEdge::new("e1", "start-1", "router-1"))
        .with_edge(WorkflowEdge::new("e2", "router-1", "agent-a").with_handle("route-a"))
        .with_edge(WorkflowEdge::new("e3", "router-1", "agent-b").with_handle("route-b"))
}

/// `start -> parallel{x,y}` with one agent per branch, then an output node.
pub fn parallel_two_branches(model: &str, merge_prompt: Option<&str>) -> WorkflowData {
    let mut data = json!({
        "branches": [
            {"id": "x", "label": "Research"},
            {"id": "y", "label": "Risks"}
        ]
    });
    if let Some(prompt) = merge_prompt {
        data["mergePrompt"] = json!(prompt);
        data["mergeModel"] = json!(model);
    }
    WorkflowData::new("parallel")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new("par-1", node_type::PARALLEL, data))
        .with_node(WorkflowNode::new(
            "agent-x",
            node_type::AGENT,
            json!({"model": model, "prompt": "Research"}),
        ))
        .with_node(WorkflowNode::new(
            "agent-y",
            node_type::AGENT,
            json!({"model": model, "prompt": "Risks"}),
        ))
        .with_node(WorkflowNode::new("out-1", node_type::OUTPUT, json!({})))
        .with_edge(WorkflowEdge::new("e1", "start-1", "par-1"))
        .with_edge(WorkflowEdge::new("e2", "par-1", "agent-x").with_handle("branch-x"))
        .with_edge(WorkflowEdge::new("e3", "par-1", "agent-y").with_handle("branch-y"))
        .with_edge(WorkflowEdge::new("e4", "par-1", "out-1"))
}

/// `start -> loop{body -> refine -> loop, done -> output}`.
pub fn refine_loop(model: &str, max_iterations: u32, on_max: &str) -> WorkflowData {
    WorkflowData::new("loop")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new(
            "loop-1",
            node_type::WHILE_LOOP,
            json!({
                "conditionPrompt": "Continue while the draft is longer than ten words.",
                "conditionModel": model,
                "maxIterations": max_iterations,
                "onMaxIterations": on_max
            }),
        ))
        .with_node(WorkflowNode::new(
            "refine-1",
            node_type::AGENT,
            json!({"model": model, "prompt": "Refine"}),
        ))
        .with_node(WorkflowNode::new("out-1", node_type::OUTPUT, json!({})))
        .with_edge(WorkflowEdge::new("e1", "start-1", "loop-1"))
        .with_edge(WorkflowEdge::new("e2", "loop-1", "refine-1").with_handle("body"))
        .with_edge(WorkflowEdge::new("e3", "refine-1", "loop-1"))
        .with_edge(WorkflowEdge::new("e4", "loop-1", "out-1").with_handle("done"))
}

/// Agent with `errorHandling.mode=branch` and an error edge to a fallback
/// agent.
pub fn error_branch(model: &str) -> WorkflowData {
    WorkflowData::new("error-branch")
        .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
        .with_node(WorkflowNode::new(
            "agent-1",
            node_type::AGENT,
            json!({
                "model": model,
                "prompt": "Primary",
                "errorHandling": {"mode": "branch", "retry": {"maxRetries": 0}}
            }),
        ))
        .with_node(WorkflowNode::new(
            "fallback-1",
            node_type::AGENT,
            json!({"model": model, "prompt": "Recover"}),
        ))
        .with_edge(WorkflowEdge::new("e1", "start-1", "agent-1"))
        .with_edge(WorkflowEdge::new("e2", "agent-1", "fallback-1").with_handle("error"))
}
