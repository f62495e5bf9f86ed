//! The conversational participant.
//!
//! An [`Agent`] owns a [`Memory`], a shared [`BackendPool`], an optional
//! [`ToolKit`], its instance hooks and a [`Speaker`]. It exposes two halves:
//!
//! * [`observe`](Agent::observe) ingests a message: `pre_observe` hooks, append
//!   to memory, `post_observe` hooks. No model call is made.
//! * [`reply`](Agent::reply) runs one bounded ReAct turn: `pre_reply` hooks over
//!   the input, then model calls interleaved with tool dispatch until the model
//!   answers without tool calls or `max_iterations` model calls have been made.
//!
//! Agents are shared as `Arc<Agent>` and every operation takes `&self`, so the
//! same agent can sit in a [`MsgHub`](crate::MsgHub) and be driven from
//! several tasks. Turns on one agent are serialized.
//!
//! # Example
//!
//! ```rust,no_run
//! use miniagent::{Agent, BackendConfig, BackendPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = BackendPool::from_configs(vec![
//!         BackendConfig::from_env("siliconflow")?,
//!         BackendConfig::from_env("zhipuai")?,
//!     ])?;
//!     let agent = Agent::new("helper", "Helper", pool)
//!         .with_system_prompt("Be helpful and brief.");
//!
//!     let response = agent.reply("Say hello").await?;
//!     agent.speak(&response.message);
//!     Ok(())
//! }
//! ```

use crate::miniagent::backend::ChatRequest;
use crate::miniagent::config::{AgentConfig, ToolFailurePolicy};
use crate::miniagent::error::{AgentError, BoxError, HookError, ToolError};
use crate::miniagent::event::{preview, AgentEvent, EventHandler};
use crate::miniagent::hooks::{self, run_chain, HookContext, HookPipeline, HookPoint, HookScope};
use crate::miniagent::memory::Memory;
use crate::miniagent::message::{ChunkAccumulator, Content, Message, MessageChunk, Role, TokenUsage};
use crate::miniagent::pool::{BackendPool, PoolStream};
use crate::miniagent::speaker::{ConsoleSpeaker, Speaker};
use crate::miniagent::toolkit::ToolKit;
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Per-call switches for [`Agent::reply_with`].
#[derive(Clone, Debug)]
pub struct ReplyOptions {
    /// Use the pool's streaming mode.
    pub stream: bool,
    /// Hand the output to the agent's speaker.
    pub auto_speak: bool,
    /// Deliver the final response to the current hub audience, if any.
    pub broadcast: bool,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            stream: false,
            auto_speak: false,
            broadcast: true,
        }
    }
}

impl ReplyOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }

    pub fn with_auto_speak(mut self, auto_speak: bool) -> Self {
        self.auto_speak = auto_speak;
        self
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }
}

/// Result of one `reply` turn.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The final assistant message, as stored in memory.
    pub message: Message,
    /// Model calls made during the turn.
    pub iterations: usize,
    /// Tool invocations executed during the turn.
    pub tool_calls_made: usize,
    /// The iteration bound ended the turn while the model still wanted tools.
    /// The stored message has its tool calls removed.
    pub truncated: bool,
    /// Usage summed over every model call that reported it.
    pub tokens_used: Option<TokenUsage>,
    /// Backend that produced the final response.
    pub backend: String,
}

impl AgentResponse {
    pub fn text(&self) -> String {
        self.message.text()
    }
}

/// Item of [`Agent::reply_stream`].
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// A raw chunk as received from the backend, before `post_reply` hooks.
    Chunk(MessageChunk),
    /// The finished turn. Always the last item of a successful stream.
    Final(AgentResponse),
}

/// Serializable summary of an agent's configuration and state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub memory_len: usize,
    pub max_messages: Option<usize>,
    pub tools: Vec<String>,
    pub backends: Vec<String>,
    pub instance_hooks: BTreeMap<String, Vec<String>>,
    pub max_iterations: usize,
    pub tool_timeout_secs: f64,
    pub in_hub: bool,
}

enum Step {
    Chunk(MessageChunk),
    Done(Result<AgentResponse, AgentError>),
}

#[derive(Default)]
struct TurnTally {
    iterations: usize,
    tool_calls_made: usize,
    tokens_used: Option<TokenUsage>,
}

/// One participant of a conversation.
pub struct Agent {
    /// Stable identifier.
    pub id: String,
    /// Display name. Stamped on every assistant message this agent produces.
    pub name: String,
    system_prompt: RwLock<String>,
    memory: Mutex<Memory>,
    pool: Arc<BackendPool>,
    toolkit: Option<Arc<ToolKit>>,
    hooks: RwLock<HookPipeline>,
    speaker: RwLock<Arc<dyn Speaker>>,
    audience: RwLock<Option<Vec<Weak<Agent>>>>,
    config: AgentConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
    turn_lock: tokio::sync::Mutex<()>,
}

impl Agent {
    /// Create an agent with unbounded memory, no tools, no system prompt and a
    /// [`ConsoleSpeaker`].
    pub fn new(id: impl Into<String>, name: impl Into<String>, pool: impl Into<Arc<BackendPool>>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: RwLock::new(String::new()),
            memory: Mutex::new(Memory::new()),
            pool: pool.into(),
            toolkit: None,
            hooks: RwLock::new(HookPipeline::new()),
            speaker: RwLock::new(Arc::new(ConsoleSpeaker)),
            audience: RwLock::new(None),
            config: AgentConfig::default(),
            event_handler: None,
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_system_prompt(self, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: RwLock::new(prompt.into()),
            ..self
        }
    }

    pub fn with_memory(self, memory: Memory) -> Self {
        Self {
            memory: Mutex::new(memory),
            ..self
        }
    }

    pub fn with_tools(mut self, toolkit: ToolKit) -> Self {
        self.toolkit = Some(Arc::new(toolkit));
        self
    }

    /// Share one toolkit between several agents.
    pub fn with_shared_tools(mut self, toolkit: Arc<ToolKit>) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn with_tool_failure_policy(mut self, policy: ToolFailurePolicy) -> Self {
        self.config.tool_failure_policy = policy;
        self
    }

    pub fn with_speaker(self, speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker: RwLock::new(speaker),
            ..self
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    // ---- Accessors ----

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn toolkit(&self) -> Option<&Arc<ToolKit>> {
        self.toolkit.as_ref()
    }

    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        *self.system_prompt.write().unwrap_or_else(|e| e.into_inner()) = prompt.into();
    }

    pub fn set_speaker(&self, speaker: Arc<dyn Speaker>) {
        *self.speaker.write().unwrap_or_else(|e| e.into_inner()) = speaker;
    }

    fn speaker(&self) -> Arc<dyn Speaker> {
        Arc::clone(&self.speaker.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn memory_lock(&self) -> MutexGuard<'_, Memory> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the whole memory, oldest first.
    pub fn memory_snapshot(&self) -> Vec<Message> {
        self.memory_lock().get_all()
    }

    pub fn memory_len(&self) -> usize {
        self.memory_lock().len()
    }

    pub fn memory_by_role(&self, role: Role) -> Vec<Message> {
        self.memory_lock().get_by_role(role)
    }

    /// Forget the conversation. Hooks, tools and the system prompt are kept.
    pub fn clear_memory(&self) {
        log::debug!("Agent::clear_memory({})", self.name);
        self.memory_lock().clear();
    }

    /// Render `message` through this agent's speaker.
    pub fn speak(&self, message: &Message) {
        self.speaker().speak_complete(message, &self.name);
    }

    pub fn info(&self) -> AgentInfo {
        let instance_hooks = {
            let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
            HookPoint::ALL
                .iter()
                .map(|point| {
                    (
                        point.as_str().to_string(),
                        hooks.names(*point, HookScope::Instance),
                    )
                })
                .filter(|(_, names)| !names.is_empty())
                .collect()
        };
        let (memory_len, max_messages) = {
            let memory = self.memory_lock();
            (memory.len(), memory.max_messages())
        };
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            system_prompt: self.system_prompt(),
            memory_len,
            max_messages,
            tools: self.toolkit.as_ref().map(|t| t.names()).unwrap_or_default(),
            backends: self.pool.backend_names(),
            instance_hooks,
            max_iterations: self.config.max_iterations,
            tool_timeout_secs: self.config.tool_timeout.as_secs_f64(),
            in_hub: self.in_hub(),
        }
    }

    // ---- Hooks ----

    /// Register an instance hook. Re-registering a name replaces that hook.
    pub fn register_hook<F>(&self, point: HookPoint, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookContext, Message) -> Result<Message, BoxError> + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(point, name, hook, HookScope::Instance);
    }

    pub fn remove_hook(&self, point: HookPoint, name: &str) -> bool {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(point, name, HookScope::Instance)
    }

    /// Remove every instance hook of this agent. Class hooks are untouched.
    pub fn clear_hooks(&self) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear(HookScope::Instance);
    }

    /// Number of instance hooks at `point`.
    pub fn hook_count(&self, point: HookPoint) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len(point, HookScope::Instance)
    }

    /// Register a hook applying to every agent, existing and future.
    pub fn register_class_hook<F>(point: HookPoint, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookContext, Message) -> Result<Message, BoxError> + Send + Sync + 'static,
    {
        hooks::register_class_hook(point, name, hook);
    }

    pub fn remove_class_hook(point: HookPoint, name: &str) -> bool {
        hooks::remove_class_hook(point, name)
    }

    /// Remove every class hook at every point.
    pub fn clear_class_hooks() {
        hooks::clear_class_hooks();
    }

    fn hook_context(&self, point: HookPoint) -> HookContext {
        HookContext {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            point,
        }
    }

    fn apply_hooks(&self, point: HookPoint, message: Message) -> Result<Message, HookError> {
        let chain = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot(point);
        run_chain(&chain, &self.hook_context(point), message)
    }

    // ---- Audience ----

    /// Other members of the active hub, or `None` outside a hub.
    pub fn audience(&self) -> Option<Vec<Arc<Agent>>> {
        self.audience
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|members| members.iter().filter_map(Weak::upgrade).collect())
    }

    pub fn audience_names(&self) -> Option<Vec<String>> {
        self.audience()
            .map(|members| members.iter().map(|a| a.name.clone()).collect())
    }

    pub fn in_hub(&self) -> bool {
        self.audience
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub(crate) fn set_audience(&self, audience: Option<Vec<Weak<Agent>>>) {
        *self.audience.write().unwrap_or_else(|e| e.into_inner()) = audience;
    }

    // ---- Events ----

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    // ---- Observe ----

    /// Ingest `message`: `pre_observe` hooks, append to memory, `post_observe`
    /// hooks. A failing `pre_observe` hook leaves memory untouched.
    pub async fn observe(&self, message: Message) -> Result<(), AgentError> {
        let message = self.apply_hooks(HookPoint::PreObserve, message)?;
        let role = message.role;
        let from = message.name.clone();
        self.memory_lock().add(message.clone());
        log::debug!(
            "Agent::observe({}): {} message from {:?}",
            self.name,
            role,
            from
        );
        self.emit(AgentEvent::MessageObserved {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            role,
            from,
        })
        .await;
        self.apply_hooks(HookPoint::PostObserve, message)?;
        Ok(())
    }

    /// Observe several messages in order, stopping at the first failure.
    pub async fn observe_many(&self, messages: impl IntoIterator<Item = Message>) -> Result<(), AgentError> {
        for message in messages {
            self.observe(message).await?;
        }
        Ok(())
    }

    // ---- Reply ----

    /// Run one turn with default [`ReplyOptions`]. Empty input adds no user
    /// message and answers from memory alone.
    pub async fn reply(&self, input: impl Into<Content>) -> Result<AgentResponse, AgentError> {
        self.run_turn(input.into(), &ReplyOptions::default(), None).await
    }

    pub async fn reply_with(
        &self,
        input: impl Into<Content>,
        options: ReplyOptions,
    ) -> Result<AgentResponse, AgentError> {
        self.run_turn(input.into(), &options, None).await
    }

    /// Run one streamed turn, yielding chunks as they arrive and the final
    /// response last. Chunks of every model call in the turn are forwarded,
    /// including calls that end in tool requests.
    pub fn reply_stream(
        &self,
        input: Content,
        options: ReplyOptions,
    ) -> impl Stream<Item = Result<ReplyEvent, AgentError>> + Send + '_ {
        let options = ReplyOptions {
            stream: true,
            ..options
        };
        async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let turn = self.run_turn(input, &options, Some(tx));
            tokio::pin!(turn);
            loop {
                let step = tokio::select! {
                    biased;
                    Some(chunk) = rx.recv() => Step::Chunk(chunk),
                    result = &mut turn => Step::Done(result),
                };
                match step {
                    Step::Chunk(chunk) => {
                        yield Ok(ReplyEvent::Chunk(chunk));
                    }
                    Step::Done(result) => {
                        while let Ok(chunk) = rx.try_recv() {
                            yield Ok(ReplyEvent::Chunk(chunk));
                        }
                        yield result.map(ReplyEvent::Final);
                        break;
                    }
                }
            }
        }
    }

    async fn run_turn(
        &self,
        input: Content,
        options: &ReplyOptions,
        chunk_tx: Option<mpsc::UnboundedSender<MessageChunk>>,
    ) -> Result<AgentResponse, AgentError> {
        let _turn = self.turn_lock.lock().await;
        let max_iterations = self.config.max_iterations.max(1);
        log::debug!(
            "Agent::reply({}): stream={}, max_iterations={}",
            self.name,
            options.stream,
            max_iterations
        );

        self.emit(AgentEvent::ReplyStarted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            message_preview: preview(&input.text(), 120),
        })
        .await;

        if !input.is_empty() {
            let user = self.apply_hooks(HookPoint::PreReply, Message::user(input))?;
            self.memory_lock().add(user);
        }

        let speaker = self.speaker();
        let speak_stream = options.auto_speak && options.stream;
        if speak_stream {
            speaker.speak_stream_start(&self.name);
        }

        let mut tally = TurnTally::default();
        let outcome = self
            .react_loop(options, max_iterations, speak_stream, &speaker, chunk_tx.as_ref(), &mut tally)
            .await;
        if speak_stream {
            speaker.speak_stream_end();
        }
        let (final_message, backend, truncated) = outcome?;
        let TurnTally {
            iterations,
            tool_calls_made,
            tokens_used,
        } = tally;

        self.memory_lock().add(final_message.clone());

        if options.broadcast {
            self.broadcast_to_audience(&final_message).await;
        }

        if options.auto_speak && !speak_stream {
            speaker.speak_complete(&final_message, &self.name);
        }

        self.emit(AgentEvent::ReplyCompleted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            iterations,
            tool_calls_made,
            truncated,
            tokens_used: tokens_used.clone(),
            response_length: final_message.text().len(),
        })
        .await;

        Ok(AgentResponse {
            message: final_message,
            iterations,
            tool_calls_made,
            truncated,
            tokens_used,
            backend,
        })
    }

    /// Model calls and tool rounds until the model answers without tool calls
    /// or the iteration bound is reached.
    async fn react_loop(
        &self,
        options: &ReplyOptions,
        max_iterations: usize,
        speak_stream: bool,
        speaker: &Arc<dyn Speaker>,
        chunk_tx: Option<&mpsc::UnboundedSender<MessageChunk>>,
        tally: &mut TurnTally,
    ) -> Result<(Message, String, bool), AgentError> {
        loop {
            tally.iterations += 1;
            self.emit(AgentEvent::ModelCallStarted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                iteration: tally.iterations,
            })
            .await;

            let request = self.build_request();
            let (message, usage, backend) = if options.stream {
                self.stream_model_call(&request, speak_stream, speaker, chunk_tx)
                    .await?
            } else {
                let response = self.pool.call(&request).await?;
                (response.message, response.usage, response.backend)
            };
            if let Some(usage) = &usage {
                tally.tokens_used.get_or_insert_with(TokenUsage::default).accumulate(usage);
            }

            let message = self.apply_hooks(HookPoint::PostReply, message.with_name(self.name.clone()))?;
            self.emit(AgentEvent::ModelCallCompleted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                iteration: tally.iterations,
                backend: backend.clone(),
                tokens_used: usage,
                tool_calls: message.tool_calls.len(),
            })
            .await;

            if !message.has_tool_calls() {
                return Ok((message, backend, false));
            }

            if tally.iterations >= max_iterations {
                log::warn!(
                    "Agent::reply({}): max_iterations ({}) reached with {} pending tool call(s)",
                    self.name,
                    max_iterations,
                    message.tool_calls.len()
                );
                self.emit(AgentEvent::MaxIterationsReached {
                    agent_id: self.id.clone(),
                    agent_name: self.name.clone(),
                    iterations: tally.iterations,
                })
                .await;
                let mut message = message;
                message.tool_calls.clear();
                return Ok((message, backend, true));
            }

            let tool_messages = self.dispatch_tools(&message, tally.iterations).await?;
            tally.tool_calls_made += tool_messages.len();

            // The call and its results land together or not at all.
            {
                let mut memory = self.memory_lock();
                memory.add(message);
                memory.extend(tool_messages);
            }
        }
    }

    /// System prompt followed by the memory window. Assistant messages spoken by
    /// other agents are presented as `[name]: ...` user turns.
    fn build_request(&self) -> ChatRequest {
        let mut messages = Vec::new();
        let prompt = self.system_prompt();
        if !prompt.is_empty() {
            messages.push(Message::system(prompt));
        }

        let window = self.memory_lock().context_window();
        for message in window {
            let foreign = message.role == Role::Assistant
                && message
                    .name
                    .as_deref()
                    .is_some_and(|speaker| speaker != self.name);
            if foreign {
                let speaker = message.name.clone().unwrap_or_default();
                let mut converted =
                    Message::user(message.content.prefixed(&format!("[{}]: ", speaker)));
                converted.name = Some(speaker);
                messages.push(converted);
            } else {
                messages.push(message);
            }
        }

        let tools = self
            .toolkit
            .as_ref()
            .map(|t| t.schemas())
            .unwrap_or_default();
        ChatRequest::new(messages).with_tools(tools)
    }

    async fn stream_model_call(
        &self,
        request: &ChatRequest,
        speak: bool,
        speaker: &Arc<dyn Speaker>,
        chunk_tx: Option<&mpsc::UnboundedSender<MessageChunk>>,
    ) -> Result<(Message, Option<TokenUsage>, String), AgentError> {
        let PoolStream { backend, mut stream } = self.pool.call_stream(request).await?;
        let mut acc = ChunkAccumulator::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if speak {
                        speaker.speak_chunk(&chunk);
                    }
                    if let Some(tx) = chunk_tx {
                        // A dropped receiver only means nobody is listening.
                        let _ = tx.send(chunk.clone());
                    }
                    acc.push(&chunk);
                }
                Err(source) => {
                    log::error!(
                        "Agent::reply({}): backend '{}' failed after {} chunk(s): {}",
                        self.name,
                        backend,
                        acc.chunk_count(),
                        source
                    );
                    return Err(AgentError::StreamInterrupted { backend, source });
                }
            }
        }

        let usage = acc.usage();
        Ok((acc.finish(), usage, backend))
    }

    /// Check every requested call before running any, so a mismatch aborts the
    /// turn without side effects.
    fn check_tool_calls(&self, message: &Message) -> Result<(), ToolError> {
        for call in &message.tool_calls {
            let metadata = self
                .toolkit
                .as_ref()
                .and_then(|t| t.metadata(&call.name))
                .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
            metadata.validate(call.arguments.clone())?;
        }
        Ok(())
    }

    async fn dispatch_tools(&self, message: &Message, iteration: usize) -> Result<Vec<Message>, AgentError> {
        for call in &message.tool_calls {
            self.emit(AgentEvent::ToolCallDetected {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                iteration,
            })
            .await;
        }

        if self.config.tool_failure_policy == ToolFailurePolicy::AbortOnMismatch {
            if let Err(error) = self.check_tool_calls(message) {
                log::error!("Agent::reply({}): aborting turn: {}", self.name, error);
                self.emit(AgentEvent::ToolExecutionCompleted {
                    agent_id: self.id.clone(),
                    agent_name: self.name.clone(),
                    tool_name: error.tool_name().to_string(),
                    success: false,
                    error: Some(error.to_string()),
                    iteration,
                })
                .await;
                return Err(error.into());
            }
        }

        let timeout = self.config.tool_timeout;
        let toolkit = self.toolkit.as_deref();
        let results = join_all(message.tool_calls.iter().map(|call| async move {
            let result = match toolkit {
                Some(toolkit) => {
                    toolkit
                        .invoke_with_timeout(&call.name, call.arguments.clone(), timeout)
                        .await
                }
                None => Err(ToolError::NotFound(call.name.clone())),
            };
            (call, result)
        }))
        .await;

        let mut tool_messages = Vec::with_capacity(results.len());
        for (call, result) in results {
            let (text, error) = match result {
                Ok(output) => (output, None),
                Err(error) => {
                    log::warn!(
                        "Agent::reply({}): tool '{}' failed: {}",
                        self.name,
                        call.name,
                        error
                    );
                    (format!("Error: {}", error), Some(error.to_string()))
                }
            };
            self.emit(AgentEvent::ToolExecutionCompleted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                tool_name: call.name.clone(),
                success: error.is_none(),
                error,
                iteration,
            })
            .await;
            tool_messages.push(Message::tool_result(call, text));
        }
        Ok(tool_messages)
    }

    /// Deliver `message` to the current audience. A recipient whose hooks
    /// reject the message is skipped; the reply itself still succeeds.
    async fn broadcast_to_audience(&self, message: &Message) {
        let Some(recipients) = self.audience() else {
            return;
        };
        for recipient in recipients {
            if let Err(error) = recipient.observe(message.clone()).await {
                log::warn!(
                    "Agent::reply({}): delivery to '{}' failed: {}",
                    self.name,
                    recipient.name,
                    error
                );
            }
        }
    }
}
