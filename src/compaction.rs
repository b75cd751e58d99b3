//! Context-window compaction: token counting plus summarize/truncate.
//!
//! Triggered lazily just before a provider call that would exceed the
//! session's token threshold. The compactor splits the transcript into a
//! "preserve recent N" tail and an older head, then summarizes the head with
//! one LLM call, drops it, or hands it to a custom compactor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;
use crate::message::ChatMessage;
use crate::provider::{ChatProvider, ChatRequest};
use crate::runtime::CancelToken;

/// Safety margin subtracted from the model context limit in `auto` mode.
pub const AUTO_SAFETY_MARGIN: u32 = 1024;
/// Context limit assumed when the provider reports no capabilities.
pub const FALLBACK_CONTEXT_LIMIT: u32 = 8192;
/// Default number of recent messages preserved verbatim.
pub const DEFAULT_PRESERVE_RECENT: usize = 4;

const DEFAULT_SUMMARIZE_PROMPT: &str = "Summarize the following conversation so it can replace \
the original messages. Preserve decisions, facts, names, and open questions. Be concise.";

/// When compaction kicks in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionThreshold {
    /// `model context limit - safety margin`.
    #[default]
    Auto,
    /// Explicit token count.
    #[serde(untagged)]
    Tokens(u32),
}

impl CompactionThreshold {
    /// Resolve against the model's context limit (when known).
    #[must_use]
    pub fn resolve(&self, context_limit: Option<u32>) -> u32 {
        match self {
            CompactionThreshold::Tokens(n) => *n,
            CompactionThreshold::Auto => {
                let limit = context_limit.unwrap_or(FALLBACK_CONTEXT_LIMIT);
                limit.saturating_sub(AUTO_SAFETY_MARGIN).max(1)
            }
        }
    }
}

/// How older messages are reduced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    /// Replace older messages with one LLM-produced summary message.
    #[default]
    Summarize,
    /// Drop older messages outright.
    Truncate,
    /// Delegate to a registered [`Compactor`].
    Custom,
}

impl CompactionStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStrategy::Summarize => "summarize",
            CompactionStrategy::Truncate => "truncate",
            CompactionStrategy::Custom => "custom",
        }
    }
}

/// Custom compaction hook: receives the older messages, returns their
/// replacement.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(&self, older: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, ExecutionError>;
}

/// Compaction configuration, normally set through execution options.
#[derive(Clone, Default)]
pub struct CompactionConfig {
    pub threshold: CompactionThreshold,
    pub preserve_recent: Option<usize>,
    pub strategy: CompactionStrategy,
    pub summarize_model: Option<String>,
    pub summarize_prompt: Option<String>,
    pub custom: Option<Arc<dyn Compactor>>,
}

impl std::fmt::Debug for CompactionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionConfig")
            .field("threshold", &self.threshold)
            .field("preserve_recent", &self.preserve_recent)
            .field("strategy", &self.strategy)
            .field("summarize_model", &self.summarize_model)
            .finish_non_exhaustive()
    }
}

/// Measurement backend for session size.
pub trait TokenCounter: Send + Sync {
    /// Approximate token count for a message list.
    fn count(&self, messages: &[ChatMessage]) -> u32;
}

/// Fast chars-per-token heuristic, no external calls.
///
/// Character count (content plus serialized tool calls plus role) divided by
/// a model-family ratio, plus a small per-message structural overhead.
#[derive(Clone, Copy, Debug)]
pub struct HeuristicTokenCounter {
    pub chars_per_token: f32,
    pub overhead_per_message: u32,
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            overhead_per_message: 3,
        }
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, messages: &[ChatMessage]) -> u32 {
        messages
            .iter()
            .map(|msg| {
                let mut chars = msg.text().len() + msg.role.len();
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        chars += call.id.len() + call.name.len();
                        if let Ok(args) = serde_json::to_string(&call.arguments) {
                            chars += args.len();
                        }
                    }
                }
                (chars as f32 / self.chars_per_token).ceil() as u32 + self.overhead_per_message
            })
            .sum()
    }
}

/// Outcome of one compaction pass, mirrored on the compaction event.
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionReport {
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub strategy: CompactionStrategy,
    pub messages_compacted: usize,
}

/// Compact `messages` in place when their token count (plus the fixed
/// `overhead_tokens` of the upcoming request) exceeds the resolved
/// threshold. Returns `None` when no compaction was needed or possible.
#[allow(clippy::too_many_arguments)]
pub async fn compact_if_needed(
    messages: &mut Vec<ChatMessage>,
    config: &CompactionConfig,
    counter: &dyn TokenCounter,
    context_limit: Option<u32>,
    overhead_tokens: u32,
    provider: &dyn ChatProvider,
    fallback_model: &str,
    cancel: &CancelToken,
) -> Result<Option<CompactionReport>, ExecutionError> {
    let tokens_before = counter.count(messages) + overhead_tokens;
    let threshold = config.threshold.resolve(context_limit);
    if tokens_before <= threshold {
        return Ok(None);
    }

    let preserve = config.preserve_recent.unwrap_or(DEFAULT_PRESERVE_RECENT);
    if messages.len() <= preserve {
        return Ok(None);
    }
    let split = messages.len() - preserve;
    let older: Vec<ChatMessage> = messages.drain(..split).collect();
    let compacted = older.len();

    let replacement = match config.strategy {
        CompactionStrategy::Truncate => Vec::new(),
        CompactionStrategy::Summarize => {
            let summary = summarize(&older, config, provider, fallback_model, cancel).await?;
            vec![ChatMessage::system(format!(
                "Summary of earlier conversation: {summary}"
            ))]
        }
        CompactionStrategy::Custom => {
            let Some(compactor) = &config.custom else {
                return Err(ExecutionError::Validation(
                    "compaction strategy is 'custom' but no compactor is registered".into(),
                ));
            };
            compactor.compact(older).await?
        }
    };

    let mut rebuilt = replacement;
    rebuilt.append(messages);
    *messages = rebuilt;

    Ok(Some(CompactionReport {
        tokens_before,
        tokens_after: counter.count(messages) + overhead_tokens,
        strategy: config.strategy,
        messages_compacted: compacted,
    }))
}

async fn summarize(
    older: &[ChatMessage],
    config: &CompactionConfig,
    provider: &dyn ChatProvider,
    fallback_model: &str,
    cancel: &CancelToken,
) -> Result<String, ExecutionError> {
    let model = config
        .summarize_model
        .as_deref()
        .unwrap_or(fallback_model)
        .to_string();
    let prompt = config
        .summarize_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SUMMARIZE_PROMPT);

    let transcript = older
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n");

    let request = ChatRequest::new(
        model,
        vec![
            ChatMessage::system(prompt),
            ChatMessage::user(transcript),
        ],
    );
    let outcome = provider.chat(request, None, cancel).await?;
    Ok(outcome.content)
}
