//! Parallel node: concurrent branch subgraphs with a merge phase.
//!
//! Each connected branch runs its own cooperative subgraph execution; the
//! merge phase strictly follows all branches. Branch streaming rides on
//! branch-scoped events keyed by `(node, instance, branch)`; the merge
//! phase streams under the synthetic [`MERGE_BRANCH_ID`] and is excluded
//! from regular-branch completion accounting.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorMode, ExecutionError};
use crate::event_bus::{Event, MERGE_BRANCH_ID};
use crate::message::ChatMessage;
use crate::provider::{ChatRequest, StreamSink};
use crate::runtime::context::BranchScope;
use crate::runtime::{ExecutionContext, runner};
use crate::workflow::ports::branch_handle;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

/// One declared branch. Defines the dynamic output port `branch-<id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Typed shape of a parallel node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelNodeData {
    pub label: Option<String>,
    pub branches: Vec<BranchDefinition>,
    pub merge_prompt: Option<String>,
    pub merge_model: Option<String>,
    pub branch_timeout_ms: Option<u64>,
    pub error_handling: Option<crate::errors::ErrorHandling>,
}

impl ParallelNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

struct MergeSink<'a> {
    ctx: &'a ExecutionContext,
    node_id: &'a str,
    instance: u64,
}

impl StreamSink for MergeSink<'_> {
    fn on_token(&self, delta: &str) {
        self.ctx.emit(Event::BranchToken {
            node_id: self.node_id.to_string(),
            branch_id: MERGE_BRANCH_ID.to_string(),
            instance: self.instance,
            delta: delta.to_string(),
        });
    }

    fn on_reasoning(&self, delta: &str) {
        self.ctx.emit(Event::BranchReasoning {
            node_id: self.node_id.to_string(),
            branch_id: MERGE_BRANCH_ID.to_string(),
            instance: self.instance,
            delta: delta.to_string(),
        });
    }
}

pub struct ParallelExtension;

impl ParallelExtension {
    fn branch_label(branch: &BranchDefinition) -> String {
        branch.label.clone().unwrap_or_else(|| branch.id.clone())
    }

    /// Concatenate branch outputs in declaration order with labels as
    /// headings.
    fn concatenate(outputs: &[(String, String)]) -> String {
        outputs
            .iter()
            .map(|(label, output)| format!("## {label}\n\n{output}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl NodeExtension for ParallelExtension {
    fn type_name(&self) -> &'static str {
        node_type::PARALLEL
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input(),
            PortDefinition::default_output().multiple_port(),
        ]
    }

    fn dynamic_ports(&self, data: &Value) -> Vec<PortDefinition> {
        ParallelNodeData::parse(data)
            .map(|parsed| {
                parsed
                    .branches
                    .iter()
                    .map(|branch| PortDefinition::output(branch_handle(&branch.id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match ParallelNodeData::parse(&node.data) {
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid parallel data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = ParallelNodeData::parse(&node.data)?;
        let instance = ctx.next_branch_instance(&node.id);
        let timeout = data
            .branch_timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(ctx.services.options.branch_timeout);

        // Only branches with a connected handle run.
        let connected: Vec<&BranchDefinition> = data
            .branches
            .iter()
            .filter(|b| !ctx.graph.children_on(&node.id, Some(&branch_handle(&b.id))).is_empty())
            .collect();

        for branch in &connected {
            ctx.emit(Event::BranchStart {
                node_id: node.id.clone(),
                branch_id: branch.id.clone(),
                label: branch.label.clone(),
                instance,
            });
        }

        let futures = connected.iter().map(|branch| {
            let branch_ctx = ctx.with_branch(BranchScope {
                node_id: node.id.clone(),
                branch_id: branch.id.clone(),
                instance,
            });
            let entries = ctx.graph.children_on(&node.id, Some(&branch_handle(&branch.id)));
            let branch_id = branch.id.clone();
            async move {
                let result = tokio::time::timeout(
                    timeout,
                    runner::execute_subgraph(&branch_ctx, entries, input, None),
                )
                .await;
                let outcome = match result {
                    Ok(Ok(outcome)) => Ok(outcome.last_output),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(ExecutionError::BranchTimeout {
                        branch_id: branch_id.clone(),
                        seconds: timeout.as_secs(),
                    }),
                };
                (branch_id, outcome)
            }
        });
        let results = join_all(futures).await;

        let mut outputs: Vec<(String, String)> = Vec::new();
        let mut first_error: Option<ExecutionError> = None;
        for ((branch, result), def) in results.into_iter().zip(connected.iter()) {
            match result {
                Ok(output) => {
                    ctx.emit(Event::BranchComplete {
                        node_id: node.id.clone(),
                        branch_id: branch.clone(),
                        instance,
                        output: Some(output.clone()),
                        error: None,
                    });
                    outputs.push((Self::branch_label(def), output));
                }
                Err(err) => {
                    ctx.emit(Event::BranchComplete {
                        node_id: node.id.clone(),
                        branch_id: branch.clone(),
                        instance,
                        output: None,
                        error: Some(err.to_string()),
                    });
                    if matches!(err, ExecutionError::Cancelled) || first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            let mode = data
                .error_handling
                .as_ref()
                .map(|h| h.mode)
                .unwrap_or(ErrorMode::Stop);
            let recoverable =
                mode == ErrorMode::Continue && !matches!(err, ExecutionError::Cancelled);
            if !recoverable {
                return Err(err);
            }
            ctx.emit(Event::diagnostic(
                "parallel",
                format!("node '{}' continuing past failed branch: {err}", node.id),
            ));
        }

        // Merge phase: strictly after all branches.
        let output = match &data.merge_prompt {
            Some(merge_prompt) if !outputs.is_empty() => {
                let model = data
                    .merge_model
                    .clone()
                    .or_else(|| ctx.services.options.default_model.clone())
                    .ok_or_else(|| {
                        ExecutionError::Validation(format!(
                            "parallel '{}' has a merge prompt but no merge model",
                            node.id
                        ))
                    })?;
                ctx.emit(Event::BranchStart {
                    node_id: node.id.clone(),
                    branch_id: MERGE_BRANCH_ID.to_string(),
                    label: Some("merge".into()),
                    instance,
                });
                let sink = MergeSink {
                    ctx,
                    node_id: &node.id,
                    instance,
                };
                let request = ChatRequest::new(
                    model,
                    vec![
                        ChatMessage::system(merge_prompt.clone()),
                        ChatMessage::user(Self::concatenate(&outputs)),
                    ],
                );
                let merge_result = ctx
                    .services
                    .provider
                    .chat(request, Some(&sink as &dyn StreamSink), &ctx.cancel)
                    .await;
                match merge_result {
                    Ok(outcome) => {
                        if let Some(usage) = outcome.usage {
                            ctx.record_usage(&node.id, usage);
                        }
                        ctx.emit(Event::BranchComplete {
                            node_id: node.id.clone(),
                            branch_id: MERGE_BRANCH_ID.to_string(),
                            instance,
                            output: Some(outcome.content.clone()),
                            error: None,
                        });
                        outcome.content
                    }
                    Err(err) => {
                        ctx.emit(Event::BranchComplete {
                            node_id: node.id.clone(),
                            branch_id: MERGE_BRANCH_ID.to_string(),
                            instance,
                            output: None,
                            error: Some(err.to_string()),
                        });
                        return Err(err.into());
                    }
                }
            }
            _ => Self::concatenate(&outputs),
        };

        Ok(NodeExecution::new(
            output,
            ctx.graph.default_children(&node.id),
        ))
    }
}
