//! Linear and fan-out composition of agents.

use crate::miniagent::agent::{Agent, ReplyOptions};
use crate::miniagent::error::AgentError;
use crate::miniagent::message::Message;
use futures_util::future::join_all;
use std::sync::Arc;

/// Feed `initial` to the first agent, its reply to the second, and so on.
/// Returns the last agent's reply, or `initial` unchanged when `agents` is empty.
/// Multimodal content is passed along as-is.
pub async fn sequential_pipeline(
    agents: &[Arc<Agent>],
    initial: Message,
    options: ReplyOptions,
) -> Result<Message, AgentError> {
    let mut current = initial;
    for (step, agent) in agents.iter().enumerate() {
        log::debug!(
            "sequential_pipeline(): step {}/{} -> {}",
            step + 1,
            agents.len(),
            agent.name
        );
        let response = agent
            .reply_with(current.content.clone(), options.clone())
            .await?;
        current = response.message;
    }
    Ok(current)
}

/// Send the same input to every agent concurrently. Replies are returned in
/// agent order; the first failure (in agent order) is returned instead.
pub async fn fanout_pipeline(
    agents: &[Arc<Agent>],
    input: Message,
    options: ReplyOptions,
) -> Result<Vec<Message>, AgentError> {
    let replies = join_all(
        agents
            .iter()
            .map(|agent| agent.reply_with(input.content.clone(), options.clone())),
    )
    .await;
    replies
        .into_iter()
        .map(|result| result.map(|response| response.message))
        .collect()
}
