//! A ChatBackend is one configured LLM endpoint.
//! It does not keep track of the conversation; the [`Agent`](crate::Agent) builds
//! a complete [`ChatRequest`] from its memory on every model call and the
//! [`BackendPool`](crate::BackendPool) decides which backend receives it.

use crate::miniagent::error::BackendError;
use crate::miniagent::message::{Message, MessageChunk, TokenUsage};
use crate::miniagent::toolkit::ToolMetadata;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// Everything a backend needs for one model call.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Full conversation to send, system prompt first.
    pub messages: Vec<Message>,
    /// Tools the model may request, empty when the agent has no toolkit.
    pub tools: Vec<ToolMetadata>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolMetadata>) -> Self {
        self.tools = tools;
        self
    }
}

/// A complete model response.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    /// The assistant message, including reasoning text and tool calls.
    pub message: Message,
    pub usage: Option<TokenUsage>,
    /// Name of the backend that produced the response.
    pub backend: String,
}

/// Type alias for a Send-able stream of response chunks.
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, BackendError>> + Send>>;

/// Trait defining the interface to interact with an LLM provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identifier used in logs and failure reports.
    fn name(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model_name(&self) -> &str;

    /// Send a request and wait for the complete response.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;

    /// Send a request and get a stream of partial responses.
    /// Backends that cannot stream keep the default. The pool only calls this
    /// when [`supports_streaming`](ChatBackend::supports_streaming) is true and
    /// otherwise delivers [`send`](ChatBackend::send) as a single chunk.
    async fn send_stream(&self, _request: &ChatRequest) -> Result<MessageChunkStream, BackendError> {
        Err(BackendError::Unsupported(self.name().to_string()))
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}
