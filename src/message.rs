//! Chat messages, multimodal content parts, and execution input.
//!
//! Messages are the primary data structure flowing between the engine and the
//! LLM provider. Each message has a role ("user", "assistant", "system" or
//! "tool") and content that is either plain text or a list of multimodal
//! parts. Tool interactions attach structured call metadata to the message.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a conversation.
///
/// # Examples
///
/// ```
/// use loomflow::message::ChatMessage;
///
/// let user_msg = ChatMessage::user("What's the weather like?");
/// let assistant_msg = ChatMessage::assistant("It's sunny today!");
/// let system_msg = ChatMessage::system("You are a helpful assistant.");
///
/// assert!(user_msg.has_role(ChatMessage::USER));
/// assert!(!user_msg.has_role(ChatMessage::ASSISTANT));
/// ```
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender.
    ///
    /// Use the constants on [`ChatMessage`] for standardized values.
    pub role: String,
    /// Message content: plain text or multimodal parts.
    pub content: MessageContent,
    /// Tool calls requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Identifier of the tool call this message responds to (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";
    /// Tool result message role.
    pub const TOOL: &'static str = "tool";

    /// Creates a new text message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a tool-result message answering the given tool call.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Self::TOOL.to_string(),
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Creates a user message carrying multimodal content parts.
    #[must_use]
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Self::USER.to_string(),
            content: MessageContent::Parts(parts),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Attach tool calls to this message (builder style).
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// The textual portion of the content; multimodal parts contribute their
    /// text segments joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Message content: plain text or an ordered list of multimodal parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Extract the textual segments of the content.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One part of a multimodal message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
    },
    File {
        name: Option<String>,
        mime_type: String,
        data: String,
    },
    Audio {
        mime_type: String,
        data: String,
    },
}

/// A structured function invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The modality of an attachment or a model capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    File,
    Audio,
    Video,
}

impl Modality {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::File => "file",
            Modality::Audio => "audio",
            Modality::Video => "video",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an attachment's bytes come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentSource {
    Url(String),
    Content(String),
}

/// A file handed to the workflow alongside the input text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Modality,
    pub mime_type: String,
    pub source: AttachmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    /// Convert this attachment into a message content part.
    #[must_use]
    pub fn to_content_part(&self) -> ContentPart {
        match (&self.kind, &self.source) {
            (Modality::Image, AttachmentSource::Url(url)) => {
                ContentPart::ImageUrl { url: url.clone() }
            }
            (Modality::Image, AttachmentSource::Content(data)) => ContentPart::ImageUrl {
                url: format!("data:{};base64,{data}", self.mime_type),
            },
            (Modality::Audio, source) => ContentPart::Audio {
                mime_type: self.mime_type.clone(),
                data: source_payload(source),
            },
            (_, source) => ContentPart::File {
                name: self.name.clone(),
                mime_type: self.mime_type.clone(),
                data: source_payload(source),
            },
        }
    }
}

fn source_payload(source: &AttachmentSource) -> String {
    match source {
        AttachmentSource::Url(url) => url.clone(),
        AttachmentSource::Content(data) => data.clone(),
    }
}

/// The input handed to a workflow execution: text plus optional attachments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInput {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ExecutionInput {
    /// Text-only input.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// Builder: attach a file to this input.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

impl From<&str> for ExecutionInput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for ExecutionInput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Prompt/completion/total token counts reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Flexible key-value metadata attached to memory entries and events.
pub type Metadata = FxHashMap<String, Value>;
