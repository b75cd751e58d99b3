//! Typed execution events: the engine's only observability surface.
//!
//! Every callback of the execution protocol is an [`Event`] variant
//! dispatched through the bus. Callers subscribe to the stream or attach
//! sinks and consume only the variants they care about. Within one
//! execution, events are emitted in the documented order: node start before
//! its tokens, tokens before finish, branch start before branch tokens,
//! all regular branch completions before merge events, completion last.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compaction::CompactionStrategy;
use crate::errors::NodeErrorPayload;
use crate::hitl::HitlRequest;
use crate::message::TokenUsage;

/// Branch identifier used for merge-phase streaming inside parallel nodes.
///
/// Merge events are excluded from "all regular branches complete" checks;
/// see [`BranchStreamTracker`](crate::event_bus::BranchStreamTracker).
pub const MERGE_BRANCH_ID: &str = "__merge__";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// A node was dequeued and is about to execute.
    NodeStart {
        node_id: String,
        node_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// A node finished and produced an output.
    NodeFinish {
        node_id: String,
        node_type: String,
        output: String,
        duration_ms: u64,
    },
    /// A node failed; the payload carries the classified error.
    NodeError {
        node_id: String,
        payload: NodeErrorPayload,
    },
    /// One streamed content delta from a provider call.
    Token { node_id: String, delta: String },
    /// Content delta from a terminal node (feeds the workflow output).
    WorkflowToken { node_id: String, delta: String },
    /// One streamed reasoning delta.
    Reasoning { node_id: String, delta: String },
    /// A router selected a route.
    RouteSelected { node_id: String, route_id: String },
    /// Token usage reported after a provider call.
    TokenUsage {
        node_id: String,
        usage: TokenUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining_context: Option<u32>,
    },
    /// The session was compacted before a provider call.
    ContextCompacted {
        tokens_before: u32,
        tokens_after: u32,
        strategy: CompactionStrategy,
        messages_compacted: usize,
    },
    /// A parallel branch began executing.
    BranchStart {
        node_id: String,
        branch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        instance: u64,
    },
    /// Content delta streamed inside a branch (or the merge phase).
    BranchToken {
        node_id: String,
        branch_id: String,
        instance: u64,
        delta: String,
    },
    /// Reasoning delta streamed inside a branch (or the merge phase).
    BranchReasoning {
        node_id: String,
        branch_id: String,
        instance: u64,
        delta: String,
    },
    /// A parallel branch finished, successfully or not.
    BranchComplete {
        node_id: String,
        branch_id: String,
        instance: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A while-loop began iteration `iteration` (1-based).
    LoopIteration {
        node_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    /// Execution suspended for human input; the response travels through
    /// the registered handler, not the bus.
    HitlRequested { request: HitlRequest },
    /// Execution finished.
    Complete {
        success: bool,
        final_output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<NodeErrorPayload>,
        duration_ms: u64,
    },
    /// Engine warning or informational notice (dropped attachment, router
    /// fallback, loop overflow notice).
    Diagnostic { scope: String, message: String },
}

impl Event {
    /// The node this event concerns, when it concerns one.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Event::NodeStart { node_id, .. }
            | Event::NodeFinish { node_id, .. }
            | Event::NodeError { node_id, .. }
            | Event::Token { node_id, .. }
            | Event::WorkflowToken { node_id, .. }
            | Event::Reasoning { node_id, .. }
            | Event::RouteSelected { node_id, .. }
            | Event::TokenUsage { node_id, .. }
            | Event::BranchStart { node_id, .. }
            | Event::BranchToken { node_id, .. }
            | Event::BranchReasoning { node_id, .. }
            | Event::BranchComplete { node_id, .. }
            | Event::LoopIteration { node_id, .. } => Some(node_id),
            Event::HitlRequested { request } => Some(&request.node_id),
            Event::ContextCompacted { .. } | Event::Complete { .. } | Event::Diagnostic { .. } => {
                None
            }
        }
    }

    /// Shorthand for diagnostics.
    #[must_use]
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic {
            scope: scope.into(),
            message: message.into(),
        }
    }

    /// Compact JSON form, one object per event.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NodeStart { node_id, node_type, .. } => {
                write!(f, "[{node_id}] start ({node_type})")
            }
            Event::NodeFinish { node_id, duration_ms, .. } => {
                write!(f, "[{node_id}] finish ({duration_ms}ms)")
            }
            Event::NodeError { node_id, payload } => {
                write!(f, "[{node_id}] error {}: {}", payload.code, payload.message)
            }
            Event::Token { node_id, delta } | Event::WorkflowToken { node_id, delta } => {
                write!(f, "[{node_id}] {delta}")
            }
            Event::Reasoning { node_id, .. } => write!(f, "[{node_id}] (reasoning)"),
            Event::RouteSelected { node_id, route_id } => {
                write!(f, "[{node_id}] route -> {route_id}")
            }
            Event::TokenUsage { node_id, usage, .. } => {
                write!(f, "[{node_id}] usage {} tokens", usage.total_tokens)
            }
            Event::ContextCompacted {
                tokens_before,
                tokens_after,
                strategy,
                ..
            } => write!(
                f,
                "context compacted {tokens_before} -> {tokens_after} ({})",
                strategy.as_str()
            ),
            Event::BranchStart { node_id, branch_id, .. } => {
                write!(f, "[{node_id}/{branch_id}] branch start")
            }
            Event::BranchToken {
                node_id,
                branch_id,
                delta,
                ..
            } => write!(f, "[{node_id}/{branch_id}] {delta}"),
            Event::BranchReasoning { node_id, branch_id, .. } => {
                write!(f, "[{node_id}/{branch_id}] (reasoning)")
            }
            Event::BranchComplete {
                node_id,
                branch_id,
                error,
                ..
            } => match error {
                Some(err) => write!(f, "[{node_id}/{branch_id}] branch failed: {err}"),
                None => write!(f, "[{node_id}/{branch_id}] branch complete"),
            },
            Event::LoopIteration {
                node_id,
                iteration,
                max_iterations,
            } => write!(f, "[{node_id}] iteration {iteration}/{max_iterations}"),
            Event::HitlRequested { request } => {
                write!(f, "[{}] awaiting human response", request.node_id)
            }
            Event::Complete {
                success,
                duration_ms,
                ..
            } => write!(
                f,
                "complete ({}) in {duration_ms}ms",
                if *success { "ok" } else { "failed" }
            ),
            Event::Diagnostic { scope, message } => write!(f, "[{scope}] {message}"),
        }
    }
}
