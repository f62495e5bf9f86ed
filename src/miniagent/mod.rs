// src/miniagent/mod.rs

pub mod agent;
pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod memory;
pub mod message;
pub mod msghub;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod speaker;
pub mod toolkit;

// Flatten the most used types so callers can write miniagent::Agent
// instead of miniagent::agent::Agent.
pub use agent::Agent;
pub use msghub::{msghub, MsgHub};
pub use pool::BackendPool;
