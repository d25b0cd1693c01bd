//! WebSocket Message Types
//!
//! Defines the JSON messages exchanged between clients (dashboards,
//! notification clients) and the pulsecast server.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::topics::Topic;
use crate::events::format_timestamp;

/// Serialized outbound text, shared between every recipient of a broadcast
pub type Frame = Arc<str>;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add topics to the connection's subscription set
    Subscribe {
        /// Requested topic names; unknown names are ignored
        #[serde(default)]
        events: Vec<String>,
    },
    /// Remove topics from the connection's subscription set
    Unsubscribe {
        #[serde(default)]
        events: Vec<String>,
    },
    /// Application-level liveness check
    Ping,
}

/// Control messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake sent once the connection is registered
    Connection {
        status: String,
        client_id: String,
        available_subscriptions: Vec<Topic>,
    },
    /// Resulting subscription set after a subscribe request
    SubscriptionConfirmed { subscribed_events: Vec<Topic> },
    /// Result of an unsubscribe request
    UnsubscriptionConfirmed {
        unsubscribed_events: Vec<Topic>,
        remaining_subscriptions: Vec<Topic>,
    },
    /// Reply to a client `ping`
    Pong { timestamp: String },
    /// Protocol or server-side error; the connection stays open unless stated
    Error { message: String },
}

impl ServerMessage {
    /// Handshake for a freshly registered connection
    pub fn connected(client_id: &str) -> Self {
        ServerMessage::Connection {
            status: "connected".to_string(),
            client_id: client_id.to_string(),
            available_subscriptions: Topic::available().to_vec(),
        }
    }

    /// Pong stamped with the current time
    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: format_timestamp(&Utc::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize into a sendable frame
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Outbound data broadcast: `{"type": <topic>, "timestamp": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub topic: Topic,
    /// RFC 3339 with millisecond precision
    pub timestamp: String,
    /// Normalized payload
    pub data: Value,
}

impl Envelope {
    /// Stamp an already-normalized payload with the current time
    pub fn new(topic: Topic, data: Value) -> Self {
        Self {
            topic,
            timestamp: format_timestamp(&Utc::now()),
            data,
        }
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Malformed inbound message. Answered with an error message; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Message has no \"type\" field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid message fields: {0}")]
    InvalidFields(String),

    #[error("Binary messages not supported")]
    Binary,
}

/// Parse a text frame from a client
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !matches!(kind, "subscribe" | "unsubscribe" | "ping") {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields(e.to_string()))
}
