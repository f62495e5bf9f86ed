//! Ordered backend failover.
//!
//! Every call walks the configured backends in order. Each backend gets its own
//! retry budget for transient errors; any other failure, or an exhausted budget,
//! moves the call on to the next backend. When all of them fail the caller gets
//! an [`AllBackendsExhaustedError`] listing every failure in attempt order.
//!
//! By default every call starts again at the first backend. With
//! [`with_sticky_failover`](BackendPool::with_sticky_failover) the pool starts at
//! the backend that last succeeded instead.

use crate::miniagent::backend::{ChatBackend, ChatRequest, ChatResponse, MessageChunkStream};
use crate::miniagent::backends::OpenAICompatibleBackend;
use crate::miniagent::config::BackendConfig;
use crate::miniagent::error::{AllBackendsExhaustedError, BackendError, BackendFailure};
use crate::miniagent::message::{Message, MessageChunk, Role};
use crate::miniagent::retry::{with_retry, RetryPolicy};
use futures_util::{stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A chunk stream opened by [`BackendPool::call_stream`].
pub struct PoolStream {
    /// Backend that is producing the stream.
    pub backend: String,
    /// Remaining chunks. Errors here happen after output was delivered and are
    /// never failed over.
    pub stream: MessageChunkStream,
}

pub struct BackendPool {
    backends: Vec<Arc<dyn ChatBackend>>,
    retry: RetryPolicy,
    sticky: bool,
    preferred: AtomicUsize,
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<dyn ChatBackend>>) -> Self {
        Self {
            backends,
            retry: RetryPolicy::default(),
            sticky: false,
            preferred: AtomicUsize::new(0),
        }
    }

    /// Build a pool of OpenAI-compatible backends, in the given order.
    pub fn from_configs(configs: Vec<BackendConfig>) -> Result<Self, BackendError> {
        let backends = configs
            .into_iter()
            .map(|config| {
                OpenAICompatibleBackend::new(config).map(|b| Arc::new(b) as Arc<dyn ChatBackend>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(backends))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start each call at the backend that served the previous successful call.
    pub fn with_sticky_failover(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn push(&mut self, backend: Arc<dyn ChatBackend>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn attempt_order(&self) -> Vec<usize> {
        let n = self.backends.len();
        let start = if self.sticky && n > 0 {
            self.preferred.load(Ordering::Relaxed) % n
        } else {
            0
        };
        (0..n).map(|i| (start + i) % n).collect()
    }

    fn record_success(&self, index: usize) {
        if self.sticky {
            self.preferred.store(index, Ordering::Relaxed);
        }
    }

    /// Send `request` and wait for a complete response.
    pub async fn call(&self, request: &ChatRequest) -> Result<ChatResponse, AllBackendsExhaustedError> {
        let mut failures = Vec::new();

        for index in self.attempt_order() {
            let backend = &self.backends[index];
            let result = with_retry(&self.retry, move || async move {
                let response = backend.send(request).await?;
                validate_response(&response.message)?;
                Ok(response)
            })
            .await;

            match result {
                Ok(mut response) => {
                    if !failures.is_empty() {
                        log::info!(
                            "BackendPool::call(): '{}' answered after {} failed backend(s)",
                            backend.name(),
                            failures.len()
                        );
                    }
                    response.backend = backend.name().to_string();
                    self.record_success(index);
                    return Ok(response);
                }
                Err(failure) => {
                    log::warn!(
                        "BackendPool::call(): backend '{}' failed after {} attempt(s): {}",
                        backend.name(),
                        failure.attempts,
                        failure.error
                    );
                    failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        error: failure.error,
                        attempts: failure.attempts,
                    });
                }
            }
        }

        let error = AllBackendsExhaustedError { failures };
        log::error!("BackendPool::call(): {}", error);
        Err(error)
    }

    /// Open a chunk stream. A backend counts as successful once it produced its
    /// first chunk with actual output; until then failures are retried and
    /// failed over exactly as in [`call`](BackendPool::call). Leading chunks
    /// without output are held back and replayed ahead of the rest, and a stream
    /// that ends before producing any output counts as malformed. Backends
    /// without a streaming mode answer through `send` and their response is
    /// delivered as a single chunk.
    pub async fn call_stream(&self, request: &ChatRequest) -> Result<PoolStream, AllBackendsExhaustedError> {
        let mut failures = Vec::new();

        for index in self.attempt_order() {
            let backend = &self.backends[index];
            let result = with_retry(&self.retry, move || async move {
                open_stream(backend.as_ref(), request).await
            })
            .await;

            match result {
                Ok(stream) => {
                    self.record_success(index);
                    return Ok(PoolStream {
                        backend: backend.name().to_string(),
                        stream,
                    });
                }
                Err(failure) => {
                    log::warn!(
                        "BackendPool::call_stream(): backend '{}' failed before first chunk after {} attempt(s): {}",
                        backend.name(),
                        failure.attempts,
                        failure.error
                    );
                    failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        error: failure.error,
                        attempts: failure.attempts,
                    });
                }
            }
        }

        let error = AllBackendsExhaustedError { failures };
        log::error!("BackendPool::call_stream(): {}", error);
        Err(error)
    }
}

async fn open_stream(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
) -> Result<MessageChunkStream, BackendError> {
    if !backend.supports_streaming() {
        return single_chunk(backend, request).await;
    }

    let mut stream = match backend.send_stream(request).await {
        Ok(stream) => stream,
        Err(BackendError::Unsupported(_)) => return single_chunk(backend, request).await,
        Err(error) => return Err(error),
    };

    let mut head = Vec::new();
    loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let has_output = chunk.has_output();
                head.push(Ok(chunk));
                if has_output {
                    return Ok(Box::pin(stream::iter(head).chain(stream)));
                }
            }
            Some(Err(error)) => return Err(error),
            None => {
                return Err(BackendError::Malformed(format!(
                    "stream ended after {} chunk(s) without any output",
                    head.len()
                )))
            }
        }
    }
}

async fn single_chunk(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
) -> Result<MessageChunkStream, BackendError> {
    let response = backend.send(request).await?;
    validate_response(&response.message)?;
    let mut chunk = MessageChunk::from_message(&response.message);
    chunk.usage = response.usage;
    Ok(Box::pin(stream::iter(std::iter::once(Ok(chunk)))))
}

/// A usable response is an assistant message carrying text, reasoning or tool calls.
fn validate_response(message: &Message) -> Result<(), BackendError> {
    if message.role != Role::Assistant {
        return Err(BackendError::Malformed(format!(
            "expected an assistant message, got role '{}'",
            message.role
        )));
    }
    let has_reasoning = message
        .reasoning_content
        .as_deref()
        .is_some_and(|r| !r.is_empty());
    if message.content.is_empty() && !message.has_tool_calls() && !has_reasoning {
        return Err(BackendError::Malformed("empty response".into()));
    }
    Ok(())
}
