//! # miniagent
//!
//! miniagent is a small runtime for building conversational agents on top of
//! OpenAI-compatible chat completion endpoints. Agents remember, call tools, talk
//! to each other and survive flaky providers.
//!
//! The crate provides layered abstractions for:
//!
//! * **Agents**: [`Agent`] pairs a [`Memory`] with a [`BackendPool`] and runs a bounded
//!   ReAct loop: model call, tool dispatch through a [`ToolKit`], repeat until the model
//!   answers in plain text or `max_iterations` is reached.
//! * **Hooks**: [`HookPipeline`] lets callers rewrite messages at four extension points
//!   (`pre_observe`, `post_observe`, `pre_reply`, `post_reply`), per agent or process-wide.
//! * **Failover**: [`BackendPool`] walks an ordered list of backends with a per-backend
//!   [`RetryPolicy`], for both complete and streamed responses.
//! * **Group chat**: [`MsgHub`] wires agents together so each reply is observed by the
//!   other participants.
//! * **Composition**: [`pipeline::sequential_pipeline`] and [`pipeline::fanout_pipeline`]
//!   chain or fan out agents.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use miniagent::{Agent, BackendConfig, BackendPool, ReplyOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     miniagent::init_logger();
//!
//!     let pool = BackendPool::from_configs(vec![BackendConfig::from_env("deepseek")?])?;
//!     let agent = Agent::new("assistant", "Assistant", pool)
//!         .with_system_prompt("You answer in one sentence.");
//!
//!     let response = agent
//!         .reply_with("What is Rust?", ReplyOptions::default().with_auto_speak(true))
//!         .await?;
//!     println!("{} model call(s)", response.iterations);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a network
//!
//! [`MockBackend`] replays a scripted sequence of replies, errors and chunk streams, so
//! agents, hubs and pools can be exercised deterministically:
//!
//! ```rust
//! use miniagent::{Agent, BackendPool, ChatBackend, MockBackend};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let backend: Arc<dyn ChatBackend> = Arc::new(MockBackend::new("mock").always_text("pong"));
//! let agent = Agent::new("a", "A", BackendPool::new(vec![backend]));
//! let response = agent.reply("ping").await.unwrap();
//! assert_eq!(response.text(), "pong");
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Library code only emits through the [`log`] facade; call this from binaries or
/// tests to get `RUST_LOG` driven output.
///
/// ```rust
/// miniagent::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `miniagent` module.
pub mod miniagent;

// Re-exporting key items for easier external access.
pub use miniagent::agent::{Agent, AgentInfo, AgentResponse, ReplyEvent, ReplyOptions};
pub use miniagent::backend;
pub use miniagent::backend::{ChatBackend, ChatRequest, ChatResponse, MessageChunkStream};
pub use miniagent::backends;
pub use miniagent::backends::{MockBackend, MockReply, OpenAICompatibleBackend};
pub use miniagent::config::{AgentConfig, BackendConfig, ToolFailurePolicy};
pub use miniagent::error::{
    AgentError, AllBackendsExhaustedError, BackendError, BackendFailure, BoxError, HookError,
    ToolError,
};
pub use miniagent::event;
pub use miniagent::event::{AgentEvent, EventHandler, HubEvent};
pub use miniagent::hooks;
pub use miniagent::hooks::{HookContext, HookPipeline, HookPoint, HookScope};
pub use miniagent::memory::Memory;
pub use miniagent::message::{
    ChunkAccumulator, Content, ContentBlock, Message, MessageChunk, Role, TokenUsage, ToolCall,
    ToolCallDelta,
};
pub use miniagent::msghub::{msghub, MsgHub};
pub use miniagent::pipeline;
pub use miniagent::pipeline::{fanout_pipeline, sequential_pipeline};
pub use miniagent::pool::{BackendPool, PoolStream};
pub use miniagent::retry::RetryPolicy;
pub use miniagent::speaker::{
    render_markdown, ColorSpeaker, ConsoleSpeaker, MarkdownSpeaker, SilentSpeaker, Speaker,
};
pub use miniagent::toolkit;
pub use miniagent::toolkit::{ToolKit, ToolMetadata, ToolParameter, ToolParameterType};
