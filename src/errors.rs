//! Structured execution errors and per-node error-handling policy.
//!
//! Every failure surfaced by the engine carries an [`ErrorCode`] so callers
//! and retry policies can classify it without string matching. Transient
//! classes (`RATE_LIMIT`, `NETWORK`, `TIMEOUT`) are retryable; permanent
//! classes (`AUTH`, `VALIDATION`) never are.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retry::RetryAttempt;

/// Classification of an execution failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LlmError,
    RateLimit,
    Timeout,
    Network,
    Auth,
    Validation,
    Cancelled,
    InfiniteLoop,
    ToolHandler,
    Unknown,
}

impl ErrorCode {
    /// Whether this class of failure may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit | ErrorCode::Network | ErrorCode::Timeout
        )
    }

    /// Whether retrying this class of failure is ever permitted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCode::Auth | ErrorCode::Validation | ErrorCode::Cancelled | ErrorCode::InfiniteLoop
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LlmError => "LLM_ERROR",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Auth => "AUTH",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InfiniteLoop => "INFINITE_LOOP",
            ErrorCode::ToolHandler => "TOOL_HANDLER",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fatal errors raised while executing a node or driving the scheduler.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    /// The LLM provider failed.
    #[error("provider error: {message}")]
    #[diagnostic(code(loomflow::execution::provider))]
    Provider {
        code: ErrorCode,
        message: String,
        status_code: Option<u16>,
    },

    /// The workflow or a node's data failed validation.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(loomflow::execution::validation),
        help("Run Engine::validate to see the full report.")
    )]
    Validation(String),

    /// The execution was cancelled via its cancel token.
    #[error("execution cancelled")]
    #[diagnostic(code(loomflow::execution::cancelled))]
    Cancelled,

    /// A node exceeded its per-execution circuit breaker.
    #[error("node '{node_id}' exceeded {limit} executions")]
    #[diagnostic(
        code(loomflow::execution::infinite_loop),
        help("Check for unbounded loop conditions or raise max_node_executions.")
    )]
    InfiniteLoop { node_id: String, limit: u32 },

    /// The scheduler exceeded its global iteration bound.
    #[error("scheduler exceeded {limit} iterations")]
    #[diagnostic(code(loomflow::execution::iteration_limit))]
    IterationLimit { limit: usize },

    /// Subflow nesting went past the configured depth cap.
    #[error("subflow depth {depth} exceeds limit {limit}")]
    #[diagnostic(code(loomflow::execution::subflow_depth))]
    SubflowDepth { depth: usize, limit: usize },

    /// A tool handler failed or was missing.
    #[error("tool '{tool}' failed: {message}")]
    #[diagnostic(code(loomflow::execution::tool))]
    ToolHandler { tool: String, message: String },

    /// A node references an extension that is not registered.
    #[error("unknown node type: {0}")]
    #[diagnostic(
        code(loomflow::execution::unknown_node_type),
        help("Register a matching extension before executing.")
    )]
    UnknownNodeType(String),

    /// A subflow node references a workflow that is not in the registry.
    #[error("subflow not found: {0}")]
    #[diagnostic(code(loomflow::execution::missing_subflow))]
    MissingSubflow(String),

    /// A branch ran past its timeout inside a parallel node.
    #[error("branch '{branch_id}' timed out after {seconds}s")]
    #[diagnostic(code(loomflow::execution::branch_timeout))]
    BranchTimeout { branch_id: String, seconds: u64 },

    /// Node data could not be decoded into the extension's shape.
    #[error(transparent)]
    #[diagnostic(code(loomflow::execution::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Anything else.
    #[error("{0}")]
    #[diagnostic(code(loomflow::execution::other))]
    Other(String),
}

impl ExecutionError {
    /// Map this error onto the wire-level taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutionError::Provider { code, .. } => *code,
            ExecutionError::Validation(_)
            | ExecutionError::UnknownNodeType(_)
            | ExecutionError::MissingSubflow(_)
            | ExecutionError::Serde(_) => ErrorCode::Validation,
            ExecutionError::Cancelled => ErrorCode::Cancelled,
            ExecutionError::InfiniteLoop { .. }
            | ExecutionError::IterationLimit { .. }
            | ExecutionError::SubflowDepth { .. } => ErrorCode::InfiniteLoop,
            ExecutionError::ToolHandler { .. } => ErrorCode::ToolHandler,
            ExecutionError::BranchTimeout { .. } => ErrorCode::Timeout,
            ExecutionError::Other(_) => ErrorCode::Unknown,
        }
    }

    /// HTTP status carried by provider failures, when one exists.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ExecutionError::Provider { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

/// The serialized error payload delivered on node-error events and routed
/// down `error` branches as the next node's input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorPayload {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_label: Option<String>,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retries: Vec<RetryAttempt>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl NodeErrorPayload {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, error: &ExecutionError) -> Self {
        Self {
            message: error.to_string(),
            code: error.code(),
            status_code: error.status_code(),
            node_id: node_id.into(),
            node_label: None,
            node_type: node_type.into(),
            retries: Vec::new(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_retries(mut self, retries: Vec<RetryAttempt>) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.node_label = label;
        self
    }

    /// Serialize this payload for consumption by an error-branch node.
    #[must_use]
    pub fn to_branch_input(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// What the scheduler does when a node fails after retries are exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Terminate the execution unsuccessfully.
    #[default]
    Stop,
    /// Record the error and keep executing other ready nodes.
    Continue,
    /// Route the serialized error down the node's `error` output handle.
    Branch,
}

/// Per-node retry configuration as it appears on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySpec {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub retry_on: Option<Vec<ErrorCode>>,
    pub skip_on: Option<Vec<ErrorCode>>,
}

/// Per-node error-handling policy (`data.errorHandling`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorHandling {
    pub mode: ErrorMode,
    pub retry: Option<RetrySpec>,
}

impl ErrorHandling {
    /// Decode the policy out of a node's raw data payload, if present.
    #[must_use]
    pub fn from_node_data(data: &Value) -> Option<Self> {
        data.get("errorHandling")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classification() {
        assert!(ErrorCode::RateLimit.is_transient());
        assert!(ErrorCode::Network.is_transient());
        assert!(!ErrorCode::Auth.is_transient());
        assert!(!ErrorCode::Auth.is_retryable());
        assert!(!ErrorCode::Validation.is_retryable());
        assert!(ErrorCode::LlmError.is_retryable());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = ExecutionError::Provider {
            code: ErrorCode::Network,
            message: "connection reset".into(),
            status_code: None,
        };
        assert_eq!(err.code(), ErrorCode::Network);
        assert_eq!(ExecutionError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            ExecutionError::SubflowDepth { depth: 11, limit: 10 }.code(),
            ErrorCode::InfiniteLoop
        );
    }

    #[test]
    fn test_error_handling_parse() {
        let data = serde_json::json!({
            "prompt": "hello",
            "errorHandling": {"mode": "branch", "retry": {"maxRetries": 2}}
        });
        let handling = ErrorHandling::from_node_data(&data).expect("parse");
        assert_eq!(handling.mode, ErrorMode::Branch);
        assert_eq!(handling.retry.unwrap().max_retries, Some(2));
    }

    #[test]
    fn test_payload_branch_input_is_json() {
        let err = ExecutionError::Provider {
            code: ErrorCode::Network,
            message: "boom".into(),
            status_code: Some(502),
        };
        let payload = NodeErrorPayload::new("agent-1", "agent", &err);
        let reparsed: NodeErrorPayload =
            serde_json::from_str(&payload.to_branch_input()).expect("round trip");
        assert_eq!(reparsed.code, ErrorCode::Network);
        assert_eq!(reparsed.status_code, Some(502));
    }
}
