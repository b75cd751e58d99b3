//! Tool node: invoke one registered tool directly, no inference.
//!
//! Static arguments from the node data are merged with the runtime input
//! (exposed as `input`). Failures default to error-branch routing so a
//! connected `error` edge catches them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorMode, ExecutionError};
use crate::runtime::ExecutionContext;
use crate::tools::ToolInvocation;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

/// Typed shape of a tool node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolNodeData {
    pub label: Option<String>,
    pub tool_id: String,
    /// Static arguments merged under the runtime input.
    pub arguments: Value,
}

impl ToolNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

pub struct ToolExtension;

impl ToolExtension {
    /// Static arguments ⊕ input: the runtime input lands under `input`
    /// unless the static arguments already claim that key.
    fn merge_arguments(statics: &Value, input: &str) -> Value {
        let mut merged = match statics {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("arguments".to_string(), other.clone());
                map
            }
        };
        merged
            .entry("input".to_string())
            .or_insert_with(|| Value::String(input.to_string()));
        Value::Object(merged)
    }
}

#[async_trait]
impl NodeExtension for ToolExtension {
    fn type_name(&self) -> &'static str {
        node_type::TOOL
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input(),
            PortDefinition::default_output().multiple_port(),
        ]
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match ToolNodeData::parse(&node.data) {
            Ok(parsed) if parsed.tool_id.is_empty() => vec![ValidationIssue::node(
                &node.id,
                "tool node references no tool id",
            )],
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid tool data: {err}"),
            )],
        }
    }

    fn default_error_mode(&self) -> ErrorMode {
        ErrorMode::Branch
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = ToolNodeData::parse(&node.data)?;
        let handler = ctx
            .services
            .tools
            .get(&data.tool_id)
            .map(|def| def.handler.clone())
            .or_else(|| ctx.services.on_tool_call.clone())
            .ok_or_else(|| ExecutionError::ToolHandler {
                tool: data.tool_id.clone(),
                message: "no handler registered".into(),
            })?;

        let output = handler
            .call(ToolInvocation {
                name: data.tool_id.clone(),
                arguments: Self::merge_arguments(&data.arguments, input),
            })
            .await
            .map_err(|err| ExecutionError::ToolHandler {
                tool: data.tool_id.clone(),
                message: err.to_string(),
            })?;

        Ok(NodeExecution::new(
            output,
            ctx.graph.default_children(&node.id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_arguments() {
        let merged = ToolExtension::merge_arguments(&json!({"path": "/tmp"}), "query text");
        assert_eq!(merged["path"], "/tmp");
        assert_eq!(merged["input"], "query text");
    }

    #[test]
    fn test_static_input_wins() {
        let merged = ToolExtension::merge_arguments(&json!({"input": "pinned"}), "runtime");
        assert_eq!(merged["input"], "pinned");
    }

    #[test]
    fn test_null_statics() {
        let merged = ToolExtension::merge_arguments(&Value::Null, "x");
        assert_eq!(merged["input"], "x");
    }
}
