//! Agent and hub event system.
//!
//! Provides a callback-based observability layer. Implement [`EventHandler`] to
//! receive notifications about model round-trips, tool executions, iteration
//! limits, observed messages and hub membership changes.
//!
//! Both trait methods have default no-op implementations, so you only override
//! what you care about. The handler is wrapped in `Arc<dyn EventHandler>` and can
//! be shared between agents and hubs.
//!
//! # Example
//!
//! ```rust,no_run
//! use miniagent::{AgentEvent, EventHandler};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::ModelCallStarted { agent_name, iteration, .. } = event {
//!             println!("{} calling model (round {})", agent_name, iteration);
//!         }
//!     }
//! }
//! ```

use crate::miniagent::message::{Role, TokenUsage};
use async_trait::async_trait;

/// Events emitted by an [`Agent`](crate::Agent) during `observe` and `reply`.
///
/// # Event Flow (during a typical `reply()` call)
///
/// ```text
/// ReplyStarted
///   └─ ModelCallStarted { iteration: 1 }
///   └─ ModelCallCompleted { iteration: 1 }
///   └─ (if tool calls requested)
///       ├─ ToolCallDetected
///       ├─ ToolExecutionCompleted
///       ├─ ModelCallStarted { iteration: 2 }
///       └─ ModelCallCompleted { iteration: 2 }
///   └─ (MaxIterationsReached if the bound cut the loop short)
/// ReplyCompleted
/// ```
#[derive(Debug, Clone)]
pub enum AgentEvent {
    // ── Reply lifecycle ───────────────────────────────────────────────────
    ReplyStarted {
        agent_id: String,
        agent_name: String,
        /// First ~120 characters of the user input.
        message_preview: String,
    },

    /// Fired before each model round-trip. Iteration 1 is the initial call.
    ModelCallStarted {
        agent_id: String,
        agent_name: String,
        iteration: usize,
    },

    ModelCallCompleted {
        agent_id: String,
        agent_name: String,
        iteration: usize,
        /// Backend that answered.
        backend: String,
        tokens_used: Option<TokenUsage>,
        /// Number of tool calls the response requested.
        tool_calls: usize,
    },

    // ── Tool loop ─────────────────────────────────────────────────────────
    ToolCallDetected {
        agent_id: String,
        agent_name: String,
        tool_name: String,
        arguments: serde_json::Value,
        iteration: usize,
    },

    ToolExecutionCompleted {
        agent_id: String,
        agent_name: String,
        tool_name: String,
        success: bool,
        /// Error text fed back to the model when `success` is false.
        error: Option<String>,
        iteration: usize,
    },

    /// The model still requested tools when the iteration bound was hit.
    MaxIterationsReached {
        agent_id: String,
        agent_name: String,
        iterations: usize,
    },

    ReplyCompleted {
        agent_id: String,
        agent_name: String,
        /// Model calls made during the reply.
        iterations: usize,
        tool_calls_made: usize,
        truncated: bool,
        tokens_used: Option<TokenUsage>,
        /// Character length of the final response text.
        response_length: usize,
    },

    // ── Ingestion ─────────────────────────────────────────────────────────
    MessageObserved {
        agent_id: String,
        agent_name: String,
        role: Role,
        /// `name` of the observed message, usually the speaking agent.
        from: Option<String>,
    },
}

/// Events emitted by a [`MsgHub`](crate::MsgHub).
#[derive(Debug, Clone)]
pub enum HubEvent {
    Entered { participants: Vec<String> },
    Exited { participants: Vec<String> },
    ParticipantAdded { agent_name: String },
    ParticipantRemoved { agent_name: String },
    /// A broadcast was delivered to `recipients` participants.
    Broadcast { messages: usize, recipients: usize },
}

/// Receives [`AgentEvent`]s and [`HubEvent`]s.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    async fn on_hub_event(&self, _event: &HubEvent) {}
}

/// Shorten `text` to at most `max` characters for previews.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
