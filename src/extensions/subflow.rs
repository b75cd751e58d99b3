//! Subflow node: invoke a registered workflow as a single node.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutionError;
use crate::runtime::{ExecutionContext, runner};
use crate::utils::templates;
use crate::workflow::{
    PortDefinition, ValidationIssue, WorkflowData, WorkflowGraph, WorkflowNode, node_type,
};

use super::{NodeExecution, NodeExtension};

/// Typed shape of a subflow node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubflowNodeData {
    pub label: Option<String>,
    pub subflow_id: String,
    /// Expressions mapped into the inner workflow's start input. Supports
    /// `{{input}}`, `{{outputs.<id>}}`, `{{context.sessionId}}`, and
    /// literal text.
    pub input_mappings: FxHashMap<String, String>,
    /// Share the parent session by reference instead of forking a fresh one.
    pub share_session: bool,
}

impl SubflowNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

pub struct SubflowExtension;

#[async_trait]
impl NodeExtension for SubflowExtension {
    fn type_name(&self) -> &'static str {
        node_type::SUBFLOW
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input(),
            PortDefinition::default_output().multiple_port(),
        ]
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match SubflowNodeData::parse(&node.data) {
            Ok(parsed) if parsed.subflow_id.is_empty() => vec![ValidationIssue::node(
                &node.id,
                "subflow node references no subflow id",
            )],
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid subflow data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = SubflowNodeData::parse(&node.data)?;
        let depth = ctx.subflow_depth + 1;
        let limit = ctx.services.options.max_subflow_depth;
        if depth > limit {
            return Err(ExecutionError::SubflowDepth { depth, limit });
        }

        let definition = ctx
            .services
            .subflows
            .get(&data.subflow_id)
            .ok_or_else(|| ExecutionError::MissingSubflow(data.subflow_id.clone()))?;

        let inner_input = resolve_input(&data, ctx, input);

        let inner_graph = Arc::new(WorkflowGraph::build(&definition.workflow));
        let entry = inner_graph
            .start_id()
            .map(str::to_string)
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "subflow '{}' has no start node",
                    data.subflow_id
                ))
            })?;

        let inner_session_id = format!("{}:{}", ctx.session_id(), data.subflow_id);
        let inner_ctx = ctx.fork_for_subflow(inner_graph, data.share_session, inner_session_id);

        let outcome =
            runner::execute_subgraph(&inner_ctx, vec![entry], &inner_input, None).await?;

        Ok(NodeExecution::new(
            outcome.last_output,
            ctx.graph.default_children(&node.id),
        ))
    }
}

/// Resolve the inner workflow's start input from the node's mappings.
///
/// A mapping named `input` takes precedence; otherwise all mapped values are
/// rendered and joined as `key: value` lines. No mappings means passthrough.
fn resolve_input(data: &SubflowNodeData, ctx: &ExecutionContext, input: &str) -> String {
    if data.input_mappings.is_empty() {
        return input.to_string();
    }
    let render = |expr: &str| templates::expand(expr, input, ctx);
    if let Some(expr) = data.input_mappings.get("input") {
        return render(expr);
    }
    let mut keys: Vec<&String> = data.input_mappings.keys().collect();
    keys.sort();
    keys.iter()
        .map(|key| format!("{key}: {}", render(&data.input_mappings[*key])))
        .collect::<Vec<_>>()
        .join("\n")
}
