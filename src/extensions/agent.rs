//! Agent node: one LLM inference step with tools, streaming, HITL, and
//! context compaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::compaction::compact_if_needed;
use crate::errors::{ErrorHandling, ExecutionError};
use crate::event_bus::Event;
use crate::hitl::{self, HitlConfig, HitlDecision, HitlMode, HitlRequest};
use crate::message::{ChatMessage, ContentPart, TokenUsage};
use crate::provider::{ChatRequest, StreamSink};
use crate::runtime::{ExecutionContext, ToolOverflowBehavior};
use crate::tools::ToolInvocation;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

/// Output handle taken when a human rejects the node's input or output.
pub const REJECTED_HANDLE: &str = "rejected";

/// Typed shape of an agent node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentNodeData {
    pub label: Option<String>,
    pub model: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Names of registry tools offered to the model.
    pub tools: Vec<String>,
    pub hitl: Option<HitlConfig>,
    pub error_handling: Option<ErrorHandling>,
    pub max_tool_iterations: Option<u32>,
    pub on_max_tool_iterations: Option<ToolOverflowBehavior>,
    /// Deprecated hint; capability lookup is authoritative.
    pub accepts_images: Option<bool>,
}

impl AgentNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

/// Forwards provider deltas onto the event bus, branch-scoped when the
/// agent runs inside a parallel branch.
struct EventStreamSink<'a> {
    ctx: &'a ExecutionContext,
    node_id: &'a str,
    terminal: bool,
}

impl StreamSink for EventStreamSink<'_> {
    fn on_token(&self, delta: &str) {
        match &self.ctx.branch {
            Some(scope) => self.ctx.emit(Event::BranchToken {
                node_id: scope.node_id.clone(),
                branch_id: scope.branch_id.clone(),
                instance: scope.instance,
                delta: delta.to_string(),
            }),
            None => {
                self.ctx.emit(Event::Token {
                    node_id: self.node_id.to_string(),
                    delta: delta.to_string(),
                });
                if self.terminal {
                    self.ctx.emit(Event::WorkflowToken {
                        node_id: self.node_id.to_string(),
                        delta: delta.to_string(),
                    });
                }
            }
        }
    }

    fn on_reasoning(&self, delta: &str) {
        match &self.ctx.branch {
            Some(scope) => self.ctx.emit(Event::BranchReasoning {
                node_id: scope.node_id.clone(),
                branch_id: scope.branch_id.clone(),
                instance: scope.instance,
                delta: delta.to_string(),
            }),
            None => self.ctx.emit(Event::Reasoning {
                node_id: self.node_id.to_string(),
                delta: delta.to_string(),
            }),
        }
    }
}

pub struct AgentExtension;

impl AgentExtension {
    /// Compose the user message, attaching only modalities the model accepts.
    fn compose_user_message(
        ctx: &ExecutionContext,
        node_id: &str,
        input: &str,
        accepted: impl Fn(crate::message::Modality) -> bool,
    ) -> ChatMessage {
        if ctx.attachments.is_empty() {
            return ChatMessage::user(input);
        }
        let mut parts = vec![ContentPart::Text {
            text: input.to_string(),
        }];
        for attachment in ctx.attachments.iter() {
            if accepted(attachment.kind) {
                parts.push(attachment.to_content_part());
            } else {
                ctx.emit(Event::diagnostic(
                    "attachments",
                    format!(
                        "node '{node_id}' dropped attachment '{}': model does not accept {}",
                        attachment.id, attachment.kind
                    ),
                ));
            }
        }
        if parts.len() == 1 {
            ChatMessage::user(input)
        } else {
            ChatMessage::user_parts(parts)
        }
    }

    /// Run the chat / tool-call loop until the model answers with content.
    #[allow(clippy::too_many_arguments)]
    async fn chat_with_tools(
        ctx: &ExecutionContext,
        node: &WorkflowNode,
        data: &AgentNodeData,
        model: &str,
        mut messages: Vec<ChatMessage>,
        sink: &EventStreamSink<'_>,
        usage_total: &mut TokenUsage,
        saw_usage: &mut bool,
    ) -> Result<String, ExecutionError> {
        let services = &ctx.services;
        let tool_specs = services.tools.specs_for(&data.tools);
        let max_iterations = data
            .max_tool_iterations
            .unwrap_or(services.options.max_tool_iterations);
        let overflow = data
            .on_max_tool_iterations
            .unwrap_or(services.options.on_max_tool_iterations);

        let mut iterations = 0u32;
        loop {
            let request = ChatRequest::new(model, messages.clone())
                .with_tools(tool_specs.clone())
                .with_temperature(data.temperature)
                .with_max_tokens(data.max_tokens);
            let outcome = services
                .provider
                .chat(request, Some(sink as &dyn StreamSink), &ctx.cancel)
                .await?;
            if let Some(usage) = outcome.usage {
                usage_total.add(&usage);
                *saw_usage = true;
            }

            if outcome.tool_calls.is_empty() {
                return Ok(outcome.content);
            }

            iterations += 1;
            if iterations > max_iterations {
                return match overflow {
                    ToolOverflowBehavior::Warning => {
                        ctx.emit(Event::diagnostic(
                            "tools",
                            format!(
                                "node '{}' hit the tool-iteration bound ({max_iterations}); continuing without further calls",
                                node.id
                            ),
                        ));
                        Ok(format!(
                            "{}\n\n[tool-iteration bound of {max_iterations} reached]",
                            outcome.content
                        ))
                    }
                    ToolOverflowBehavior::Error => Err(ExecutionError::ToolHandler {
                        tool: "(loop)".into(),
                        message: format!("exceeded {max_iterations} tool iterations"),
                    }),
                    ToolOverflowBehavior::Hitl => {
                        let config = HitlConfig {
                            enabled: true,
                            mode: HitlMode::Approval,
                            prompt: Some(format!(
                                "Agent '{}' exceeded {max_iterations} tool iterations. Continue?",
                                node.id
                            )),
                            schema: None,
                            timeout_ms: None,
                            default_action: HitlDecision::Reject,
                        };
                        let request = HitlRequest::new(
                            node.id.clone(),
                            HitlMode::Approval,
                            json!({"content": outcome.content, "iterations": iterations}),
                        );
                        ctx.emit(Event::HitlRequested {
                            request: request.clone(),
                        });
                        let response =
                            hitl::dispatch(services.hitl.as_ref(), &config, request).await;
                        if response.decision == HitlDecision::Reject {
                            return Err(ExecutionError::ToolHandler {
                                tool: "(loop)".into(),
                                message: format!(
                                    "exceeded {max_iterations} tool iterations; human declined to continue"
                                ),
                            });
                        }
                        Ok(outcome.content)
                    }
                };
            }

            // Dispatch each requested call, then hand the results back.
            messages.push(
                ChatMessage::assistant(outcome.content.clone())
                    .with_tool_calls(outcome.tool_calls.clone()),
            );
            for call in &outcome.tool_calls {
                let invocation = ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                };
                let handler = services
                    .tools
                    .get(&call.name)
                    .map(|def| def.handler.clone())
                    .or_else(|| services.on_tool_call.clone());
                let result = match handler {
                    Some(handler) => handler.call(invocation).await.map_err(|err| {
                        ExecutionError::ToolHandler {
                            tool: call.name.clone(),
                            message: err.to_string(),
                        }
                    })?,
                    None => {
                        return Err(ExecutionError::ToolHandler {
                            tool: call.name.clone(),
                            message: "no handler registered".into(),
                        });
                    }
                };
                messages.push(ChatMessage::tool(call.id.clone(), result));
            }
        }
    }
}

#[async_trait]
impl NodeExtension for AgentExtension {
    fn type_name(&self) -> &'static str {
        node_type::AGENT
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::default_input(),
            PortDefinition::default_output().multiple_port(),
        ]
    }

    fn dynamic_ports(&self, data: &Value) -> Vec<PortDefinition> {
        match AgentNodeData::parse(data) {
            Ok(parsed) if parsed.hitl.as_ref().is_some_and(|h| h.enabled) => {
                vec![PortDefinition::output(REJECTED_HANDLE)]
            }
            _ => Vec::new(),
        }
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match AgentNodeData::parse(&node.data) {
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid agent data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = AgentNodeData::parse(&node.data)?;
        let services = &ctx.services;
        let mut input = input.to_string();

        // Pre-execution suspension for approval/input modes.
        if let Some(config) = data.hitl.as_ref().filter(|h| h.enabled)
            && matches!(config.mode, HitlMode::Approval | HitlMode::Input)
        {
            let mut request =
                HitlRequest::new(node.id.clone(), config.mode, json!({"input": input}));
            request.prompt = config.prompt.clone();
            request.timeout_ms = config.timeout_ms;
            ctx.emit(Event::HitlRequested {
                request: request.clone(),
            });
            let response = hitl::dispatch(services.hitl.as_ref(), config, request).await;
            match (response.decision, config.mode) {
                (HitlDecision::Reject, _) => {
                    let rejected = ctx.graph.children_on(&node.id, Some(REJECTED_HANDLE));
                    if rejected.is_empty() {
                        return Err(ExecutionError::Other(format!(
                            "input to node '{}' was rejected by reviewer",
                            node.id
                        )));
                    }
                    return Ok(NodeExecution::new(input, rejected));
                }
                (HitlDecision::Modify, _) => {
                    if let Some(payload) = response.payload {
                        input = payload;
                    }
                }
                (HitlDecision::Approve, HitlMode::Input) => {
                    if let Some(payload) = response.payload {
                        input = format!("{input}\n\n{payload}");
                    }
                }
                (HitlDecision::Approve, _) => {}
            }
        }

        let model = data
            .model
            .clone()
            .or_else(|| services.options.default_model.clone())
            .ok_or_else(|| {
                ExecutionError::Validation(format!(
                    "agent '{}' has no model and no default model is configured",
                    node.id
                ))
            })?;
        let capabilities = services.provider.model_capabilities(&model);

        let user_message = Self::compose_user_message(ctx, &node.id, &input, |modality| {
            capabilities
                .as_ref()
                .map(|caps| caps.accepts(modality))
                .unwrap_or(modality == crate::message::Modality::Text)
        });

        // Compact the session lazily before the call that would overflow.
        // The system prompt and the composed user message count toward the
        // threshold but are never compacted away themselves.
        let context_limit = capabilities.as_ref().map(|caps| caps.context_limit);
        let mut overhead_probe = vec![user_message.clone()];
        if !data.prompt.is_empty() {
            overhead_probe.push(ChatMessage::system(data.prompt.clone()));
        }
        let overhead_tokens = services.token_counter.count(&overhead_probe);
        let mut session_messages = ctx.session_messages();
        if let Some(report) = compact_if_needed(
            &mut session_messages,
            &services.options.compaction,
            services.token_counter.as_ref(),
            context_limit,
            overhead_tokens,
            services.provider.as_ref(),
            &model,
            &ctx.cancel,
        )
        .await?
        {
            ctx.session_replace(session_messages.clone());
            ctx.emit(Event::ContextCompacted {
                tokens_before: report.tokens_before,
                tokens_after: report.tokens_after,
                strategy: report.strategy,
                messages_compacted: report.messages_compacted,
            });
        }

        let mut transcript = Vec::with_capacity(session_messages.len() + 2);
        if !data.prompt.is_empty() {
            transcript.push(ChatMessage::system(data.prompt.clone()));
        }
        transcript.extend(session_messages);
        transcript.push(user_message);

        let sink = EventStreamSink {
            ctx,
            node_id: &node.id,
            terminal: ctx.graph.feeds_terminal(&node.id),
        };

        let mut usage_total = TokenUsage::default();
        let mut saw_usage = false;
        let mut output = Self::chat_with_tools(
            ctx,
            node,
            &data,
            &model,
            transcript,
            &sink,
            &mut usage_total,
            &mut saw_usage,
        )
        .await?;

        if saw_usage {
            ctx.record_usage(&node.id, usage_total);
            ctx.emit(Event::TokenUsage {
                node_id: node.id.clone(),
                usage: usage_total,
                remaining_context: context_limit
                    .map(|limit| limit.saturating_sub(usage_total.total_tokens)),
            });
        }

        // Post-execution review.
        if let Some(config) = data.hitl.as_ref().filter(|h| h.enabled)
            && config.mode == HitlMode::Review
        {
            let mut request =
                HitlRequest::new(node.id.clone(), HitlMode::Review, json!({"output": output}));
            request.prompt = config.prompt.clone();
            request.timeout_ms = config.timeout_ms;
            ctx.emit(Event::HitlRequested {
                request: request.clone(),
            });
            let response = hitl::dispatch(services.hitl.as_ref(), config, request).await;
            match response.decision {
                HitlDecision::Reject => {
                    let rejected = ctx.graph.children_on(&node.id, Some(REJECTED_HANDLE));
                    if rejected.is_empty() {
                        return Err(ExecutionError::Other(format!(
                            "output of node '{}' was rejected by reviewer",
                            node.id
                        )));
                    }
                    ctx.session_push(ChatMessage::user(input.clone()));
                    ctx.session_push(ChatMessage::assistant(output.clone()));
                    return Ok(NodeExecution::new(output, rejected));
                }
                HitlDecision::Modify => {
                    if let Some(payload) = response.payload {
                        output = payload;
                    }
                }
                HitlDecision::Approve => {}
            }
        }

        ctx.session_push(ChatMessage::user(input));
        ctx.session_push(ChatMessage::assistant(output.clone()));

        Ok(NodeExecution::new(
            output,
            ctx.graph.default_children(&node.id),
        ))
    }
}
