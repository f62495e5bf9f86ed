//! Conversation data model.
//!
//! A [`Message`] is the unit stored in [`Memory`](crate::Memory), sent to
//! backends, passed through hooks and delivered by hubs. Streaming backends emit
//! [`MessageChunk`]s which a [`ChunkAccumulator`] folds back into a `Message`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Steering instructions set by the developer.
    System,
    /// Human (or upstream pipeline) input.
    User,
    /// Model output.
    Assistant,
    /// Result of a tool invocation.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed block of a multimodal payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Image reference: `http(s)://`, `data:` or `file://` URL.
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// Plain text or an ordered sequence of typed blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl Content {
    /// Start an empty multimodal payload.
    pub fn multimodal() -> Self {
        Content::Blocks(Vec::new())
    }

    /// Append a text block, converting plain text into blocks if needed.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let mut blocks = self.into_blocks();
        blocks.push(ContentBlock::Text { text: text.into() });
        Content::Blocks(blocks)
    }

    /// Append an image reference.
    pub fn with_image(self, url: impl Into<String>) -> Self {
        let mut blocks = self.into_blocks();
        blocks.push(ContentBlock::Image {
            url: url.into(),
            detail: None,
        });
        Content::Blocks(blocks)
    }

    fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Content::Text(text) if text.is_empty() => Vec::new(),
            Content::Text(text) => vec![ContentBlock::Text { text }],
            Content::Blocks(blocks) => blocks,
        }
    }

    /// Text view: plain text as-is, text blocks joined by newlines.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Blocks(blocks) => blocks.is_empty(),
        }
    }

    pub fn has_images(&self) -> bool {
        match self {
            Content::Text(_) => false,
            Content::Blocks(blocks) => blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::Image { .. })),
        }
    }

    /// Prefix the first text block (or the text) with `prefix`.
    pub fn prefixed(self, prefix: &str) -> Content {
        match self {
            Content::Text(text) => Content::Text(format!("{}{}", prefix, text)),
            Content::Blocks(mut blocks) => {
                match blocks
                    .iter_mut()
                    .find(|b| matches!(b, ContentBlock::Text { .. }))
                {
                    Some(ContentBlock::Text { text }) => text.insert_str(0, prefix),
                    _ => blocks.insert(
                        0,
                        ContentBlock::Text {
                            text: prefix.trim_end().to_string(),
                        },
                    ),
                }
                Content::Blocks(blocks)
            }
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider assigned identifier, echoed back in the `tool` result message.
    pub id: String,
    pub name: String,
    /// Arguments as JSON. Unparseable provider output is kept as a JSON string.
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call with a freshly generated id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A conversation turn. Treated as immutable once appended to a memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Content,
    /// Speaking agent (assistant messages) or tool name (tool messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model "thinking" text, absent for non-reasoning responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            name: None,
            reasoning_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// A `tool` message answering `call`.
    pub fn tool_result(call: &ToolCall, output: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, Content::Text(output.into()));
        message.name = Some(call.name.clone());
        message.tool_call_id = Some(call.id.clone());
        message
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = Some(reasoning.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Text view of the content.
    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Incremental fragment of a tool call inside a streamed response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the call within the response; deltas sharing an index merge.
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Partial JSON text, concatenated across deltas.
    pub arguments: String,
}

/// Represents a chunk of a streaming response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageChunk {
    /// Text delta.
    pub content: String,
    /// Reasoning-text delta.
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the final chunk of a response.
    pub finish_reason: Option<String>,
    /// Some providers report usage on the last chunk.
    pub usage: Option<TokenUsage>,
}

impl MessageChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning_content: reasoning.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.reasoning_content.is_empty()
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }

    /// True when the chunk carries text, reasoning or a tool-call delta.
    /// Role markers, finish reasons and usage reports alone do not count.
    pub fn has_output(&self) -> bool {
        !self.content.is_empty() || !self.reasoning_content.is_empty() || !self.tool_calls.is_empty()
    }

    /// Express a complete message as a single chunk.
    pub fn from_message(message: &Message) -> Self {
        Self {
            content: message.text(),
            reasoning_content: message.reasoning_content.clone().unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: Some(call.id.clone()),
                    name: Some(call.name.clone()),
                    arguments: call.arguments.to_string(),
                })
                .collect(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        }
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds a chunk sequence into the aggregated final [`Message`].
#[derive(Default)]
pub struct ChunkAccumulator {
    content: String,
    reasoning: String,
    calls: BTreeMap<usize, PartialToolCall>,
    usage: Option<TokenUsage>,
    chunks: usize,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &MessageChunk) {
        self.chunks += 1;
        self.content.push_str(&chunk.content);
        self.reasoning.push_str(&chunk.reasoning_content);
        for delta in &chunk.tool_calls {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = &delta.id {
                call.id = Some(id.clone());
            }
            if let Some(name) = &delta.name {
                call.name.push_str(name);
            }
            call.arguments.push_str(&delta.arguments);
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage.clone()
    }

    /// Build the final assistant message.
    pub fn finish(self) -> Message {
        let tool_calls = self
            .calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                let arguments = parse_arguments(&c.arguments);
                let mut call = ToolCall::new(c.name, arguments);
                if let Some(id) = c.id {
                    call.id = id;
                }
                call
            })
            .collect();
        let mut message = Message::assistant(self.content).with_tool_calls(tool_calls);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }
        message
    }
}

/// Parse provider supplied argument text. Empty text is an empty object;
/// unparseable text is preserved as a JSON string so validation can report it.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_multimodal_text_view() {
        let content = Content::multimodal()
            .with_text("What is in this picture?")
            .with_image("file:///tmp/cat.png")
            .with_text("Answer briefly.");
        assert!(content.has_images());
        assert_eq!(content.text(), "What is in this picture?\nAnswer briefly.");
    }

    #[test]
    fn test_prefixed_blocks() {
        let content = Content::multimodal()
            .with_image("https://example.com/a.png")
            .with_text("hello");
        match content.prefixed("[Bob]: ") {
            Content::Blocks(blocks) => assert_eq!(
                blocks[1],
                ContentBlock::Text {
                    text: "[Bob]: hello".into()
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_accumulator_merges_tool_call_deltas() {
        let mut acc = ChunkAccumulator::new();
        acc.push(&MessageChunk::reasoning("thinking"));
        acc.push(&MessageChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("get_time".into()),
                arguments: "{\"tz\":".into(),
            }],
            ..Default::default()
        });
        acc.push(&MessageChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                arguments: "\"UTC\"}".into(),
                ..Default::default()
            }],
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        });
        assert_eq!(acc.chunk_count(), 3);

        let message = acc.finish();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.reasoning_content.as_deref(), Some("thinking"));
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id, "call_1");
        assert_eq!(message.tool_calls[0].arguments, json!({"tz": "UTC"}));
    }

    #[test]
    fn test_parse_arguments_keeps_garbage_as_string() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{oops"), json!("{oops"));
    }

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::new("calculate", json!({"expression": "1+1"}));
        let message = Message::tool_result(&call, "2");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(message.name.as_deref(), Some("calculate"));
    }
}
