//! Scripted chat provider for deterministic engine tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use loomflow::message::{TokenUsage, ToolCall};
use loomflow::provider::{
    ChatOutcome, ChatProvider, ChatRequest, ModelCapabilities, ProviderError, StreamSink,
};
use loomflow::runtime::CancelToken;

/// One scripted provider answer, consumed in FIFO order.
pub enum Scripted {
    /// Plain text, streamed token-by-token, with default usage.
    Text(String),
    /// Text with explicit usage numbers.
    WithUsage(String, TokenUsage),
    /// A tool-call request.
    ToolCall { name: String, arguments: Value },
    /// A provider failure.
    Fail(FailKind),
}

impl Scripted {
    pub fn text(content: impl Into<String>) -> Self {
        Scripted::Text(content.into())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum FailKind {
    Network,
    RateLimit,
    Timeout,
    Auth,
}

impl FailKind {
    fn to_error(self) -> ProviderError {
        match self {
            FailKind::Network => ProviderError::Network("connection reset".into()),
            FailKind::RateLimit => ProviderError::RateLimit {
                retry_after_ms: Some(10),
            },
            FailKind::Timeout => ProviderError::Timeout,
            FailKind::Auth => ProviderError::Auth("invalid api key".into()),
        }
    }
}

/// Provider double that pops scripted answers and records every request.
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<ChatRequest>>,
    capabilities: Mutex<FxHashMap<String, ModelCapabilities>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            capabilities: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn scripted(responses: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        let provider = Self::new();
        provider.script.lock().extend(responses);
        provider
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().push_back(response);
    }

    pub fn set_capabilities(&self, model: &str, caps: ModelCapabilities) {
        self.capabilities.lock().insert(model.to_string(), caps);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        stream: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> Result<ChatOutcome, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.calls.lock().push(request);
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Scripted::text("ok"));
        match next {
            Scripted::Text(content) => {
                if let Some(sink) = stream {
                    for chunk in content.split_inclusive(' ') {
                        sink.on_token(chunk);
                    }
                }
                Ok(ChatOutcome {
                    content,
                    tool_calls: Vec::new(),
                    usage: Some(TokenUsage::new(10, 5)),
                })
            }
            Scripted::WithUsage(content, usage) => Ok(ChatOutcome {
                content,
                tool_calls: Vec::new(),
                usage: Some(usage),
            }),
            Scripted::ToolCall { name, arguments } => Ok(ChatOutcome {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call-{}", self.calls.lock().len()),
                    name,
                    arguments,
                }],
                usage: Some(TokenUsage::new(10, 5)),
            }),
            Scripted::Fail(kind) => Err(kind.to_error()),
        }
    }

    fn model_capabilities(&self, model: &str) -> Option<ModelCapabilities> {
        self.capabilities
            .lock()
            .get(model)
            .cloned()
            .or_else(|| Some(ModelCapabilities::text_only(8192)))
    }
}
