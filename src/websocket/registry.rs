//! Connection Registry
//!
//! Tracks live connections and their identity. The registry itself holds no
//! lock; it is owned by [`EventBroadcaster`](super::EventBroadcaster), which
//! mutates it together with the subscription map.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::broadcaster::HubError;
use super::messages::{Frame, ServerMessage};

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// Lifecycle of a connection
///
/// `Connecting -> Open -> Closing -> Closed`. Subscription changes keep a
/// connection `Open`; a failed handshake goes straight to `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closing) | (Open, Open) | (Open, Closing) | (Closing, Closed)
        )
    }
}

/// A registered connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Outbound queue drained by the connection's transport task
    pub sender: mpsc::UnboundedSender<Frame>,
    pub created_at: DateTime<Utc>,
    state: ConnectionState,
}

impl Connection {
    fn new(sender: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            created_at: Utc::now(),
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), HubError> {
        if !self.state.can_transition_to(next) {
            return Err(HubError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Live connections keyed by id
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Assign an id, send the handshake and add the connection to the live set
    pub fn register(&mut self, sender: mpsc::UnboundedSender<Frame>) -> Result<ConnectionId, HubError> {
        if self.connections.len() >= self.max_connections {
            return Err(HubError::TooManyConnections(self.max_connections));
        }

        let mut connection = Connection::new(sender);
        let handshake = ServerMessage::connected(&connection.id).to_frame()?;
        if connection.sender.send(handshake).is_err() {
            connection.transition(ConnectionState::Closing)?;
            return Err(HubError::SendFailed);
        }
        connection.transition(ConnectionState::Open)?;

        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        Ok(id)
    }

    /// Remove a connection, leaving it `Closed`
    pub fn remove(&mut self, id: &str) -> Option<Connection> {
        let mut connection = self.connections.remove(id)?;
        // Open connections pass through Closing on the way out
        if connection.state == ConnectionState::Open {
            connection.state = ConnectionState::Closing;
        }
        connection.transition(ConnectionState::Closed).ok()?;
        Some(connection)
    }

    /// Mark a connection as closing without removing it yet
    pub fn mark_closing(&mut self, id: &str) {
        if let Some(connection) = self.connections.get_mut(id) {
            let _ = connection.transition(ConnectionState::Closing);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Copy of the live set: ids with their outbound senders
    pub fn snapshot(&self) -> Vec<(ConnectionId, mpsc::UnboundedSender<Frame>)> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Open)
            .map(|c| (c.id.clone(), c.sender.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
