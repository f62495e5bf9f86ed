use crate::miniagent::backend::{ChatBackend, ChatRequest, ChatResponse, MessageChunkStream};
use crate::miniagent::error::BackendError;
use crate::miniagent::message::{ChunkAccumulator, Message, MessageChunk, ToolCall};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted outcome of a [`MockBackend`] call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Message(Message),
    Error(BackendError),
    /// Streamed chunks; an `Err` item breaks the stream at that point.
    Chunks(Vec<Result<MessageChunk, BackendError>>),
}

/// A mock backend that returns pre-configured replies, for tests and offline demos.
///
/// Scripted replies are consumed in order; once the script is empty the
/// fallback set with [`always`](MockBackend::always) is returned, or a
/// `Malformed` error if there is none.
pub struct MockBackend {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    streaming: bool,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            streaming: false,
            latency: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: MockReply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(MockReply::Message(Message::assistant(text.into())))
    }

    pub fn then_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        self.then(MockReply::Message(tool_call_message(name, arguments)))
    }

    pub fn then_error(self, error: BackendError) -> Self {
        self.then(MockReply::Error(error))
    }

    pub fn then_chunks(self, chunks: Vec<Result<MessageChunk, BackendError>>) -> Self {
        self.then(MockReply::Chunks(chunks))
    }

    /// Reply used once the script is exhausted.
    pub fn always(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn always_text(self, text: impl Into<String>) -> Self {
        self.always(MockReply::Message(Message::assistant(text.into())))
    }

    pub fn always_error(self, error: BackendError) -> Self {
        self.always(MockReply::Error(error))
    }

    /// Model that requests the same tool on every call.
    pub fn always_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        self.always(MockReply::Message(tool_call_message(name, arguments)))
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `send`/`send_stream` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn next_reply(&self, request: &ChatRequest) -> Result<MockReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        scripted
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| BackendError::Malformed(format!("mock '{}' has no reply left", self.name)))
    }
}

fn tool_call_message(name: impl Into<String>, arguments: Value) -> Message {
    Message::assistant("").with_tool_calls(vec![ToolCall::new(name, arguments)])
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let message = match self.next_reply(request).await? {
            MockReply::Message(message) => message,
            MockReply::Error(error) => return Err(error),
            MockReply::Chunks(chunks) => {
                let mut acc = ChunkAccumulator::new();
                for chunk in chunks {
                    acc.push(&chunk?);
                }
                acc.finish()
            }
        };
        Ok(ChatResponse {
            message,
            usage: None,
            backend: self.name.clone(),
        })
    }

    async fn send_stream(&self, request: &ChatRequest) -> Result<MessageChunkStream, BackendError> {
        if !self.streaming {
            return Err(BackendError::Unsupported(self.name.clone()));
        }
        let chunks = match self.next_reply(request).await? {
            MockReply::Message(message) => vec![Ok(MessageChunk::from_message(&message))],
            MockReply::Error(error) => return Err(error),
            MockReply::Chunks(chunks) => chunks,
        };
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}
