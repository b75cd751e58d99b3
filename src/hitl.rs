//! Human-in-the-loop suspension protocol.
//!
//! Nodes opted in for human review suspend execution as an awaited future:
//! the scheduler hands a [`HitlRequest`] to the registered [`HitlHandler`]
//! and blocks the cooperative loop until a [`HitlResponse`] arrives or the
//! request times out. No handler registered means HITL is skipped entirely.
//! Durable pause across process restarts is a caller responsibility.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// When the suspension happens relative to node execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlMode {
    /// Pause before execution; approve, reject, or modify the input.
    Approval,
    /// Collect data (optionally matching a schema) before execution.
    Input,
    /// Pause after execution; approve, reject, or modify the output.
    Review,
}

/// The reviewer's verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlDecision {
    #[default]
    Approve,
    Reject,
    Modify,
}

/// Node-level HITL configuration (`data.hitl`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlConfig {
    #[serde(default)]
    pub enabled: bool,
    pub mode: HitlMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Expected shape of collected data in `input` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Applied when the handler does not answer within the timeout.
    #[serde(default)]
    pub default_action: HitlDecision,
}

impl HitlConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A suspension request delivered to the handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub id: String,
    pub node_id: String,
    pub mode: HitlMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// The input (approval/input modes) or output (review mode) under review.
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl HitlRequest {
    #[must_use]
    pub fn new(node_id: impl Into<String>, mode: HitlMode, context: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            mode,
            prompt: None,
            context,
            options: None,
            timeout_ms: None,
        }
    }
}

/// The handler's answer to a suspension request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlResponse {
    pub decision: HitlDecision,
    /// Modified input/output, or the collected data in `input` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl HitlResponse {
    #[must_use]
    pub fn approve() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reject() -> Self {
        Self {
            decision: HitlDecision::Reject,
            payload: None,
        }
    }

    #[must_use]
    pub fn modify(payload: impl Into<String>) -> Self {
        Self {
            decision: HitlDecision::Modify,
            payload: Some(payload.into()),
        }
    }
}

/// Receiver of suspension requests; usually a UI bridge.
#[async_trait]
pub trait HitlHandler: Send + Sync {
    async fn on_request(&self, request: HitlRequest) -> HitlResponse;
}

/// Await the handler's answer, applying the configured timeout and default
/// action. A missing handler resolves to the default action immediately.
pub async fn dispatch(
    handler: Option<&Arc<dyn HitlHandler>>,
    config: &HitlConfig,
    request: HitlRequest,
) -> HitlResponse {
    let Some(handler) = handler else {
        return HitlResponse {
            decision: config.default_action,
            payload: None,
        };
    };
    match config.timeout() {
        Some(limit) => match tokio::time::timeout(limit, handler.on_request(request)).await {
            Ok(response) => response,
            Err(_) => HitlResponse {
                decision: config.default_action,
                payload: None,
            },
        },
        None => handler.on_request(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowHandler;

    #[async_trait]
    impl HitlHandler for SlowHandler {
        async fn on_request(&self, _request: HitlRequest) -> HitlResponse {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HitlResponse::reject()
        }
    }

    fn approval_config(timeout_ms: Option<u64>) -> HitlConfig {
        HitlConfig {
            enabled: true,
            mode: HitlMode::Approval,
            prompt: None,
            schema: None,
            timeout_ms,
            default_action: HitlDecision::Approve,
        }
    }

    #[tokio::test]
    async fn test_missing_handler_applies_default() {
        let config = approval_config(None);
        let request = HitlRequest::new("agent-1", HitlMode::Approval, Value::Null);
        let response = dispatch(None, &config, request).await;
        assert_eq!(response.decision, HitlDecision::Approve);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_default() {
        let handler: Arc<dyn HitlHandler> = Arc::new(SlowHandler);
        let config = approval_config(Some(10));
        let request = HitlRequest::new("agent-1", HitlMode::Approval, Value::Null);
        let response = dispatch(Some(&handler), &config, request).await;
        assert_eq!(response.decision, HitlDecision::Approve);
    }
}
