//! Per-agent conversation memory.

use crate::miniagent::message::{Message, Role};
use serde::Serialize;
use std::collections::VecDeque;

/// Ordered store of conversation turns, optionally capacity-bounded.
///
/// When bounded, `len() <= max_messages` always holds and the retained
/// messages are the most recent ones in arrival order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Memory {
    messages: VecDeque<Message>,
    max_messages: Option<usize>,
}

impl Memory {
    /// Unbounded memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory keeping at most `max_messages` turns. A capacity of zero keeps nothing.
    pub fn bounded(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages.min(1024)),
            max_messages: Some(max_messages),
        }
    }

    pub fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    /// Append a message, evicting the oldest ones on overflow.
    pub fn add(&mut self, message: Message) {
        self.messages.push_back(message);
        if let Some(max) = self.max_messages {
            while self.messages.len() > max {
                self.messages.pop_front();
            }
        }
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.add(message);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Clone of every stored message, oldest first.
    pub fn get_all(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Messages with the given role, preserving order.
    pub fn get_by_role(&self, role: Role) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }

    /// The most recent `n` messages, oldest first.
    pub fn last(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages to send to a model. Eviction can cut a tool exchange in half;
    /// leading `tool` messages whose call was evicted are skipped.
    pub fn context_window(&self) -> Vec<Message> {
        self.messages
            .iter()
            .skip_while(|m| m.role == Role::Tool)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miniagent::message::ToolCall;
    use serde_json::json;

    #[test]
    fn test_bounded_keeps_most_recent() {
        let mut memory = Memory::bounded(3);
        for i in 0..10 {
            memory.add(Message::user(format!("m{}", i)));
            assert!(memory.len() <= 3);
        }
        let texts: Vec<String> = memory.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut memory = Memory::bounded(0);
        memory.add(Message::user("dropped"));
        assert!(memory.is_empty());
    }

    #[test]
    fn test_get_by_role_does_not_reorder() {
        let mut memory = Memory::new();
        memory.add(Message::user("q1"));
        memory.add(Message::assistant("a1"));
        memory.add(Message::user("q2"));

        let users = memory.get_by_role(Role::User);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].text(), "q2");
        assert_eq!(memory.len(), 3);
        assert_eq!(memory.last(2)[0].text(), "a1");
    }

    #[test]
    fn test_context_window_skips_orphaned_tool_results() {
        let call = ToolCall::new("echo", json!({}));
        let mut memory = Memory::bounded(2);
        memory.add(Message::assistant("").with_tool_calls(vec![call.clone()]));
        memory.add(Message::tool_result(&call, "out"));
        memory.add(Message::assistant("done"));

        let window = memory.context_window();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].text(), "done");
    }
}
