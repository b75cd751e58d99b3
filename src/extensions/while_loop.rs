//! While-loop node: bounded iterative execution of a body subgraph.
//!
//! The condition is evaluated before each pass (iteration 0 always runs);
//! the body subgraph executes with the previous iteration's output as its
//! input, strictly sequentially. Loop state is per-execution and cleared on
//! exit. Exits leave through the `done` port.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutionError;
use crate::event_bus::Event;
use crate::message::ChatMessage;
use crate::provider::ChatRequest;
use crate::runtime::context::LoopState;
use crate::runtime::{ExecutionContext, runner};
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

pub use crate::workflow::ports::{BODY_HANDLE, DONE_HANDLE};

/// Behavior when the iteration cap is hit before the condition says done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxIterationsBehavior {
    /// Fail the node.
    Error,
    /// Append a notice to the output, then exit via `done`.
    #[default]
    Warning,
    /// Exit via `done` silently.
    Continue,
}

/// Typed shape of a while-loop node's data payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhileLoopNodeData {
    pub label: Option<String>,
    pub condition_prompt: String,
    pub condition_model: Option<String>,
    pub max_iterations: u32,
    pub on_max_iterations: MaxIterationsBehavior,
    /// Name of a registered [`LoopEvaluator`] replacing the LLM condition.
    pub custom_evaluator: Option<String>,
}

impl Default for WhileLoopNodeData {
    fn default() -> Self {
        Self {
            label: None,
            condition_prompt: String::new(),
            condition_model: None,
            max_iterations: 5,
            on_max_iterations: MaxIterationsBehavior::default(),
            custom_evaluator: None,
        }
    }
}

impl WhileLoopNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

/// Everything a custom evaluator sees when deciding whether to continue.
#[derive(Clone, Debug)]
pub struct EvaluatorInput {
    pub current_input: String,
    pub iteration: u32,
    pub last_output: Option<String>,
    pub loop_outputs: Vec<String>,
    pub node_outputs: FxHashMap<String, String>,
    pub session: Vec<ChatMessage>,
}

/// Custom loop-condition hook registered by name through execution options.
#[async_trait]
pub trait LoopEvaluator: Send + Sync {
    /// `true` to run the body again, `false` to exit via `done`.
    async fn should_continue(&self, input: EvaluatorInput) -> Result<bool, ExecutionError>;
}

pub struct WhileLoopExtension;

impl WhileLoopExtension {
    async fn evaluate_condition(
        ctx: &ExecutionContext,
        node: &WorkflowNode,
        data: &WhileLoopNodeData,
        state: &LoopState,
        current_input: &str,
    ) -> Result<bool, ExecutionError> {
        if let Some(name) = &data.custom_evaluator {
            let evaluator = ctx
                .services
                .options
                .custom_evaluators
                .get(name)
                .ok_or_else(|| {
                    ExecutionError::Validation(format!(
                        "loop '{}' references unregistered evaluator '{name}'",
                        node.id
                    ))
                })?;
            return evaluator
                .should_continue(EvaluatorInput {
                    current_input: current_input.to_string(),
                    iteration: state.iteration,
                    last_output: state.last_output.clone(),
                    loop_outputs: state.outputs.clone(),
                    node_outputs: ctx.outputs_snapshot(),
                    session: ctx.session_messages(),
                })
                .await;
        }

        let model = data
            .condition_model
            .clone()
            .or_else(|| ctx.services.options.default_model.clone())
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "loop '{}' has no condition model and no default model is configured",
                    node.id
                ))
            })?;
        let system = format!(
            "You are a loop condition. {}\n\nAnswer with exactly one word: \
             \"continue\" to run another iteration, or \"done\" to stop.",
            data.condition_prompt
        );
        let user = format!(
            "Iteration: {}\nLast output:\n{}",
            state.iteration,
            state.last_output.as_deref().unwrap_or("(none)")
        );
        let request = ChatRequest::new(
            model,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        );
        let outcome = ctx
            .services
            .provider
            .chat(request, None, &ctx.cancel)
            .await?;
        let answer = outcome.content.trim().to_lowercase();
        Ok(answer.contains("continue") && !answer.starts_with("done"))
    }
}

#[async_trait]
impl NodeExtension for WhileLoopExtension {
    fn type_name(&self) -> &'static str {
        node_type::WHILE_LOOP
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input().multiple_port(),
            PortDefinition::output(BODY_HANDLE),
            PortDefinition::output(DONE_HANDLE),
        ]
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match WhileLoopNodeData::parse(&node.data) {
            Ok(parsed) => {
                let mut issues = Vec::new();
                if parsed.condition_prompt.is_empty() && parsed.custom_evaluator.is_none() {
                    issues.push(ValidationIssue::node(
                        &node.id,
                        "while-loop needs a condition prompt or a custom evaluator",
                    ));
                }
                issues
            }
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid while-loop data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = WhileLoopNodeData::parse(&node.data)?;
        let body_entries = ctx.graph.children_on(&node.id, Some(BODY_HANDLE));
        let done_children = ctx.graph.children_on(&node.id, Some(DONE_HANDLE));

        let mut state = LoopState {
            is_active: true,
            ..LoopState::default()
        };
        ctx.set_loop_state(&node.id, state.clone());

        let mut overflow_notice = false;
        loop {
            if ctx.cancel.is_cancelled() {
                ctx.clear_loop_state(&node.id);
                return Err(ExecutionError::Cancelled);
            }

            if state.iteration >= data.max_iterations {
                match data.on_max_iterations {
                    MaxIterationsBehavior::Error => {
                        ctx.clear_loop_state(&node.id);
                        return Err(ExecutionError::InfiniteLoop {
                            node_id: node.id.clone(),
                            limit: data.max_iterations,
                        });
                    }
                    MaxIterationsBehavior::Warning => {
                        ctx.emit(Event::diagnostic(
                            "loop",
                            format!(
                                "loop '{}' reached its iteration cap of {}",
                                node.id, data.max_iterations
                            ),
                        ));
                        overflow_notice = true;
                    }
                    MaxIterationsBehavior::Continue => {}
                }
                break;
            }

            // Iteration 0 always runs the body at least once.
            let should_continue = if state.iteration == 0 {
                true
            } else {
                Self::evaluate_condition(ctx, node, &data, &state, input).await?
            };
            if !should_continue {
                break;
            }

            ctx.emit(Event::LoopIteration {
                node_id: node.id.clone(),
                iteration: state.iteration + 1,
                max_iterations: data.max_iterations,
            });

            if body_entries.is_empty() {
                // Loop with no body behaves as a pass-through.
                state.outputs.push(input.to_string());
                state.last_output = Some(input.to_string());
                state.iteration += 1;
                ctx.set_loop_state(&node.id, state.clone());
                break;
            }

            let body_input = state.last_output.clone().unwrap_or_else(|| input.to_string());
            let outcome = runner::execute_subgraph(
                ctx,
                body_entries.clone(),
                &body_input,
                Some(&node.id),
            )
            .await;
            let body_output = match outcome {
                Ok(result) => result.last_output,
                Err(err) => {
                    ctx.clear_loop_state(&node.id);
                    return Err(err);
                }
            };

            state.outputs.push(body_output.clone());
            state.last_output = Some(body_output);
            state.iteration += 1;
            ctx.set_loop_state(&node.id, state.clone());
        }

        let mut output = state.last_output.clone().unwrap_or_else(|| input.to_string());
        if overflow_notice {
            output.push_str("\n\n[iteration cap reached before the condition was satisfied]");
        }

        ctx.clear_loop_state(&node.id);
        Ok(NodeExecution::new(output, done_children))
    }
}
