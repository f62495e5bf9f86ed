//! Group communication between agents.
//!
//! While a [`MsgHub`] is active, every participant's audience is the set of the
//! other participants, so a participant's `reply` is delivered to everyone else
//! through `observe`. Entering assigns the audiences and broadcasts the optional
//! announcement; exiting (or dropping the hub) resets every audience.
//!
//! ```rust,no_run
//! use miniagent::{msghub, Agent, Message};
//! use std::sync::Arc;
//!
//! # async fn demo(alice: Arc<Agent>, bob: Arc<Agent>) -> Result<(), miniagent::AgentError> {
//! let mut hub = msghub(
//!     vec![alice.clone(), bob.clone()],
//!     Some(Message::user("Discuss the weather, one sentence each.")),
//! );
//! hub.enter().await?;
//! alice.reply("").await?; // delivered to bob
//! bob.reply("").await?; // delivered to alice
//! hub.exit();
//! # Ok(())
//! # }
//! ```
//!
//! At most one active hub may cover a given agent at a time; overlapping hubs
//! overwrite each other's audience assignments.

use crate::miniagent::agent::Agent;
use crate::miniagent::error::AgentError;
use crate::miniagent::event::{EventHandler, HubEvent};
use crate::miniagent::message::Message;
use std::sync::Arc;

pub struct MsgHub {
    participants: Vec<Arc<Agent>>,
    announcement: Vec<Message>,
    active: bool,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl MsgHub {
    /// Create an inactive hub. Duplicate agents are kept once.
    pub fn new(participants: impl IntoIterator<Item = Arc<Agent>>) -> Self {
        let mut hub = Self {
            participants: Vec::new(),
            announcement: Vec::new(),
            active: false,
            event_handler: None,
        };
        for agent in participants {
            if !hub.contains(&agent) {
                hub.participants.push(agent);
            }
        }
        hub
    }

    /// Message broadcast to all participants on [`enter`](MsgHub::enter).
    pub fn with_announcement(mut self, message: Message) -> Self {
        self.announcement.push(message);
        self
    }

    pub fn with_announcements(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.announcement.extend(messages);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn participants(&self) -> &[Arc<Agent>] {
        &self.participants
    }

    pub fn participant_names(&self) -> Vec<String> {
        self.participants.iter().map(|a| a.name.clone()).collect()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn contains(&self, agent: &Arc<Agent>) -> bool {
        self.participants.iter().any(|p| Arc::ptr_eq(p, agent))
    }

    /// Activate the hub: assign audiences, then broadcast the announcement.
    /// If the announcement is rejected the hub is deactivated again.
    pub async fn enter(&mut self) -> Result<(), AgentError> {
        log::debug!("MsgHub::enter(): {:?}", self.participant_names());
        self.active = true;
        self.reset_audience();
        self.emit(HubEvent::Entered {
            participants: self.participant_names(),
        })
        .await;

        if !self.announcement.is_empty() {
            let announcement = self.announcement.clone();
            if let Err(error) = self.broadcast_all(announcement).await {
                log::error!("MsgHub::enter(): announcement failed: {}", error);
                self.exit();
                return Err(error);
            }
        }
        Ok(())
    }

    /// Deactivate the hub and reset every participant's audience. Idempotent.
    pub fn exit(&mut self) {
        if !self.active {
            return;
        }
        log::debug!("MsgHub::exit(): {:?}", self.participant_names());
        self.active = false;
        for agent in &self.participants {
            agent.set_audience(None);
        }
        self.emit_detached(HubEvent::Exited {
            participants: self.participant_names(),
        });
    }

    /// Add a participant. Adding a member again is a no-op.
    pub fn add(&mut self, agent: Arc<Agent>) {
        self.add_all(std::iter::once(agent));
    }

    pub fn add_all(&mut self, agents: impl IntoIterator<Item = Arc<Agent>>) {
        for agent in agents {
            if self.contains(&agent) {
                continue;
            }
            let name = agent.name.clone();
            self.participants.push(agent);
            self.emit_detached(HubEvent::ParticipantAdded { agent_name: name });
        }
        self.reset_audience();
    }

    /// Remove a participant and clear its audience. Removing a non-member is a no-op.
    pub fn remove(&mut self, agent: &Arc<Agent>) {
        self.remove_all(std::slice::from_ref(agent));
    }

    pub fn remove_all(&mut self, agents: &[Arc<Agent>]) {
        for agent in agents {
            let Some(pos) = self.participants.iter().position(|p| Arc::ptr_eq(p, agent)) else {
                continue;
            };
            let removed = self.participants.remove(pos);
            removed.set_audience(None);
            self.emit_detached(HubEvent::ParticipantRemoved {
                agent_name: removed.name.clone(),
            });
        }
        self.reset_audience();
    }

    /// Deliver `message` to every participant, in participant order, through
    /// `observe`. The sender is not excluded. Stops at the first failure.
    pub async fn broadcast(&self, message: Message) -> Result<(), AgentError> {
        self.broadcast_all(vec![message]).await
    }

    /// Deliver several messages; each participant observes all of them in order
    /// before the next participant is served.
    pub async fn broadcast_all(&self, messages: Vec<Message>) -> Result<(), AgentError> {
        for agent in &self.participants {
            agent.observe_many(messages.iter().cloned()).await?;
        }
        self.emit(HubEvent::Broadcast {
            messages: messages.len(),
            recipients: self.participants.len(),
        })
        .await;
        Ok(())
    }

    fn reset_audience(&self) {
        if !self.active {
            return;
        }
        for agent in &self.participants {
            let others = self
                .participants
                .iter()
                .filter(|p| !Arc::ptr_eq(p, agent))
                .map(Arc::downgrade)
                .collect();
            agent.set_audience(Some(others));
        }
    }

    async fn emit(&self, event: HubEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_hub_event(&event).await;
        }
    }

    /// Fire-and-forget delivery for synchronous callers.
    fn emit_detached(&self, event: HubEvent) {
        let Some(handler) = &self.event_handler else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let handler = Arc::clone(handler);
            runtime.spawn(async move {
                handler.on_hub_event(&event).await;
            });
        }
    }
}

impl Drop for MsgHub {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Build an inactive hub over `participants` with an optional announcement.
pub fn msghub(
    participants: impl IntoIterator<Item = Arc<Agent>>,
    announcement: impl IntoIterator<Item = Message>,
) -> MsgHub {
    MsgHub::new(participants).with_announcements(announcement)
}
