//! Concrete [`ChatBackend`](crate::ChatBackend) implementations.

pub mod common;
pub mod http_pool;
pub mod mock;
pub mod openai;

pub use mock::{MockBackend, MockReply};
pub use openai::OpenAICompatibleBackend;
