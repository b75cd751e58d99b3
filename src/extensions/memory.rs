//! Memory node: query or store against the pluggable memory adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutionError;
use crate::memory::{MemoryEntry, SearchOptions};
use crate::message::Metadata;
use crate::runtime::ExecutionContext;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOperation {
    #[default]
    Query,
    Store,
}

/// Typed shape of a memory node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryNodeData {
    pub label: Option<String>,
    pub operation: MemoryOperation,
    pub limit: Option<usize>,
    pub namespace: Option<String>,
    pub threshold: Option<f64>,
    pub metadata: Metadata,
    /// Emitted instead of an empty hit list on `query`.
    pub fallback: Option<String>,
}

impl MemoryNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

pub struct MemoryExtension;

#[async_trait]
impl NodeExtension for MemoryExtension {
    fn type_name(&self) -> &'static str {
        node_type::MEMORY
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input(),
            PortDefinition::default_output().multiple_port(),
        ]
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match MemoryNodeData::parse(&node.data) {
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid memory data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = MemoryNodeData::parse(&node.data)?;
        let memory = ctx.services.memory.as_ref().ok_or_else(|| {
            ExecutionError::Validation(format!(
                "memory node '{}' requires a memory adapter",
                node.id
            ))
        })?;

        let output = match data.operation {
            MemoryOperation::Query => {
                let hits = memory
                    .search(
                        input,
                        SearchOptions {
                            limit: data.limit,
                            namespace: data.namespace.clone(),
                            threshold: data.threshold,
                        },
                    )
                    .await
                    .map_err(|err| ExecutionError::Other(err.to_string()))?;
                if hits.is_empty() {
                    data.fallback
                        .clone()
                        .unwrap_or_else(|| "No matching memories found.".to_string())
                } else {
                    hits.iter()
                        .enumerate()
                        .map(|(i, hit)| {
                            format!("{}. ({:.2}) {}", i + 1, hit.score, hit.text)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            MemoryOperation::Store => {
                let id = memory
                    .store(MemoryEntry {
                        text: input.to_string(),
                        metadata: data.metadata.clone(),
                        namespace: data.namespace.clone(),
                    })
                    .await
                    .map_err(|err| ExecutionError::Other(err.to_string()))?;
                format!("Stored memory {id}")
            }
        };

        Ok(NodeExecution::new(
            output,
            ctx.graph.default_children(&node.id),
        ))
    }
}
