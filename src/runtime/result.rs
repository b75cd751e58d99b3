//! The result returned from one workflow execution.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::errors::NodeErrorPayload;
use crate::message::{ChatMessage, TokenUsage};

use super::context::NodeUsage;

/// Everything an embedder needs after an execution: the final output,
/// per-node results, ordering, usage accounting, and (on failure) the
/// structured error plus all partial data needed to display, debug, and
/// resume.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    /// Alias of `final_output`; kept for wire compatibility.
    pub output: String,
    pub final_output: String,
    /// The output node that produced the final output, when one ran.
    pub final_node_id: Option<String>,
    /// Last produced output per node id.
    pub node_outputs: FxHashMap<String, String>,
    /// Node ids in completion order.
    pub execution_order: Vec<String>,
    /// The node executing when the run stopped.
    pub last_active_node_id: Option<String>,
    pub error: Option<NodeErrorPayload>,
    pub duration: Duration,
    /// Aggregate usage, when any provider call reported it.
    pub usage: Option<TokenUsage>,
    /// Per-node usage ledger.
    pub token_usage_details: Vec<NodeUsage>,
    /// The session transcript at the end of the run.
    pub session_messages: Vec<ChatMessage>,
}

impl ExecutionResult {
    /// Convenience accessor mirroring `node_outputs.get`.
    #[must_use]
    pub fn output_of(&self, node_id: &str) -> Option<&str> {
        self.node_outputs.get(node_id).map(String::as_str)
    }
}
