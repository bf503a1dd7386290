//! Addressed event delivery over per-connection queues.
//!
//! Every registered connection owns one bounded `mpsc` queue, so events for a
//! single connection arrive in publish order. Delivery is fire-and-forget: a
//! full or closed queue drops the event for that connection only.
//!
//! Topics group the connections of one session. The agent group holds every
//! connected agent. Subscribing twice or unsubscribing an absent member is a
//! no-op.

use std::collections::HashSet;

use dashmap::{DashMap, DashSet};
use livedesk_types::event::ServerEvent;
use livedesk_types::identity::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where an event should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One connection.
    Connection(ConnectionId),
    /// Every member of a session topic, optionally skipping the sender.
    Topic {
        session_id: Uuid,
        except: Option<ConnectionId>,
    },
    /// Every connected agent, optionally skipping one.
    AgentGroup { except: Option<ConnectionId> },
}

/// Fan-out router shared between the coordinator and the transport.
pub struct EventRouter {
    buffer: usize,
    /// Outbound queue per connection.
    connections: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    /// Session topic -> member connections.
    topics: DashMap<Uuid, HashSet<ConnectionId>>,
    agents: DashSet<ConnectionId>,
}

impl EventRouter {
    /// Create a router whose per-connection queues hold `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            connections: DashMap::new(),
            topics: DashMap::new(),
            agents: DashSet::new(),
        }
    }

    /// Register a connection and return the receiving end of its queue.
    ///
    /// Registering an existing id replaces its queue; the old receiver sees
    /// the channel close.
    pub fn register(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.connections.insert(connection_id, tx);
        debug!(%connection_id, "connection registered with router");
        rx
    }

    /// Remove a connection from the router, every topic, and the agent group.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        let removed = self.connections.remove(&connection_id).is_some();
        self.agents.remove(&connection_id);
        self.topics.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
        if removed {
            debug!(%connection_id, "connection unregistered from router");
        }
        removed
    }

    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn join_agents(&self, connection_id: ConnectionId) {
        self.agents.insert(connection_id);
    }

    pub fn subscribe(&self, session_id: Uuid, connection_id: ConnectionId) {
        self.topics
            .entry(session_id)
            .or_default()
            .insert(connection_id);
    }

    pub fn unsubscribe(&self, session_id: Uuid, connection_id: ConnectionId) {
        let now_empty = match self.topics.get_mut(&session_id) {
            Some(mut members) => {
                members.remove(&connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.topics.remove_if(&session_id, |_, members| members.is_empty());
        }
    }

    /// Drop a topic and all of its memberships.
    pub fn close_topic(&self, session_id: Uuid) {
        self.topics.remove(&session_id);
    }

    /// Current members of a session topic.
    pub fn topic_members(&self, session_id: Uuid) -> Vec<ConnectionId> {
        self.topics
            .get(&session_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Deliver an event to a target. Returns how many queues accepted it.
    pub fn publish(&self, target: Target, event: ServerEvent) -> usize {
        let recipients: Vec<ConnectionId> = match target {
            Target::Connection(connection_id) => vec![connection_id],
            Target::Topic { session_id, except } => self
                .topic_members(session_id)
                .into_iter()
                .filter(|c| Some(*c) != except)
                .collect(),
            Target::AgentGroup { except } => self
                .agents
                .iter()
                .map(|c| *c)
                .filter(|c| Some(*c) != except)
                .collect(),
        };

        recipients
            .into_iter()
            .filter(|connection_id| self.deliver(*connection_id, event.clone()))
            .count()
    }

    /// Deliver an event to one connection.
    pub fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.publish(Target::Connection(connection_id), event) == 1
    }

    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self.connections.get(&connection_id) else {
            debug!(%connection_id, "dropping event for unknown connection");
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%connection_id, "outbound queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%connection_id, "outbound queue closed, dropping event");
                false
            }
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("connections", &self.connections.len())
            .field("topics", &self.topics.len())
            .field("agents", &self.agents.len())
            .finish()
    }
}
