//! Provider abstraction: the engine's only LLM dependency.
//!
//! Concrete clients (OpenRouter, local inference servers, test doubles) are
//! external collaborators implementing [`ChatProvider`]. The engine issues
//! chat requests, forwards streamed deltas through a [`StreamSink`], and
//! queries model capabilities to decide which attachment modalities a node
//! may include.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::ErrorCode;
use crate::message::{ChatMessage, Modality, TokenUsage, ToolCall};
use crate::runtime::CancelToken;

/// A tool made available to the model for one chat call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub parameters: Value,
}

/// Constraint on which tool the model must call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool { name: String },
}

/// Requested output format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// One chat request to the provider.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The provider's answer to a chat request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl ChatOutcome {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }
}

/// What a model can consume and produce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    pub input_modalities: Vec<Modality>,
    pub output_modalities: Vec<Modality>,
    pub context_limit: u32,
}

impl ModelCapabilities {
    /// Text-only capabilities with the given context window.
    #[must_use]
    pub fn text_only(context_limit: u32) -> Self {
        Self {
            input_modalities: vec![Modality::Text],
            output_modalities: vec![Modality::Text],
            context_limit,
        }
    }

    #[must_use]
    pub fn accepts(&self, modality: Modality) -> bool {
        self.input_modalities.contains(&modality)
    }
}

/// Receiver for streamed deltas during a chat call.
///
/// Both methods default to no-ops so implementations only observe what they
/// need. Providers must stop delivering deltas promptly once the request's
/// cancel token fires; late deltas are tolerated but discarded by consumers.
pub trait StreamSink: Send + Sync {
    fn on_token(&self, _delta: &str) {}
    fn on_reasoning(&self, _delta: &str) {}
}

/// No-op sink for calls whose tokens nobody observes.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl StreamSink for NullSink {}

/// Errors surfaced by provider implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("network error: {0}")]
    #[diagnostic(code(loomflow::provider::network))]
    Network(String),

    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    #[diagnostic(code(loomflow::provider::rate_limit))]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("request timed out")]
    #[diagnostic(code(loomflow::provider::timeout))]
    Timeout,

    #[error("authentication failed: {0}")]
    #[diagnostic(
        code(loomflow::provider::auth),
        help("Check the provider API key and account status.")
    )]
    Auth(String),

    #[error("provider rejected request: {message}")]
    #[diagnostic(code(loomflow::provider::api))]
    Api {
        status_code: Option<u16>,
        message: String,
    },

    #[error("stream error: {0}")]
    #[diagnostic(code(loomflow::provider::stream))]
    Stream(String),

    #[error("request cancelled")]
    #[diagnostic(code(loomflow::provider::cancelled))]
    Cancelled,
}

impl ProviderError {
    /// Map this provider failure onto the engine taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::Network(_) => ErrorCode::Network,
            ProviderError::RateLimit { .. } => ErrorCode::RateLimit,
            ProviderError::Timeout => ErrorCode::Timeout,
            ProviderError::Auth(_) => ErrorCode::Auth,
            ProviderError::Api { .. } | ProviderError::Stream(_) => ErrorCode::LlmError,
            ProviderError::Cancelled => ErrorCode::Cancelled,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status_code, .. } => *status_code,
            ProviderError::RateLimit { .. } => Some(429),
            ProviderError::Auth(_) => Some(401),
            _ => None,
        }
    }
}

impl From<ProviderError> for crate::errors::ExecutionError {
    fn from(err: ProviderError) -> Self {
        if matches!(err, ProviderError::Cancelled) {
            return crate::errors::ExecutionError::Cancelled;
        }
        crate::errors::ExecutionError::Provider {
            code: err.code(),
            status_code: err.status_code(),
            message: err.to_string(),
        }
    }
}

/// Pluggable chat/stream interface over an LLM client.
///
/// Implementations must be safe for concurrent use: parallel branches issue
/// overlapping calls against the same provider instance.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Execute one chat call, forwarding streamed deltas to `stream` when the
    /// backend supports streaming. Implementations should observe `cancel`
    /// and return [`ProviderError::Cancelled`] once it fires.
    async fn chat(
        &self,
        request: ChatRequest,
        stream: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> Result<ChatOutcome, ProviderError>;

    /// Capability metadata for a model, or `None` when the model is unknown.
    fn model_capabilities(&self, model: &str) -> Option<ModelCapabilities>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_codes() {
        assert_eq!(
            ProviderError::Network("reset".into()).code(),
            ErrorCode::Network
        );
        assert_eq!(
            ProviderError::RateLimit { retry_after_ms: None }.code(),
            ErrorCode::RateLimit
        );
        assert_eq!(ProviderError::Timeout.code(), ErrorCode::Timeout);
        assert_eq!(ProviderError::Auth("bad key".into()).code(), ErrorCode::Auth);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProviderError::RateLimit { retry_after_ms: Some(100) }.status_code(),
            Some(429)
        );
        assert_eq!(ProviderError::Auth("nope".into()).status_code(), Some(401));
        assert_eq!(ProviderError::Timeout.status_code(), None);
    }

    #[test]
    fn test_capabilities() {
        let caps = ModelCapabilities::text_only(8192);
        assert!(caps.accepts(Modality::Text));
        assert!(!caps.accepts(Modality::Image));
    }
}
