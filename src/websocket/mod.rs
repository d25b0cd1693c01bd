//! WebSocket Real-Time Streaming
//!
//! Distributes freshly computed metrics to connected clients.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: live connections and their identity
//! - **SubscriptionManager**: per-connection topic sets
//! - **EventBroadcaster**: owns both, fans events out by subscription
//! - **Handler**: WebSocket upgrade, control messages, keepalive
//! - **Messages**: client and server message formats
//!
//! ## Protocol
//!
//! Clients connect to `ws://localhost:8765/` and subscribe to topics such as
//! `threshold_breach`, `portfolio_analytics` or `all`. A connection that never
//! subscribes receives every broadcast.
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8765/');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'subscribe', events: ['threshold_breach']}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   console.log(msg.type, msg.data);
//! };
//! ```

mod broadcaster;
mod handler;
mod messages;
mod registry;
mod subscriptions;
mod topics;

pub use broadcaster::{BroadcastReport, BroadcastStats, BroadcasterConfig, EventBroadcaster, HubError};
pub use handler::{router, websocket_handler, Keepalive, TransportContext};
pub use messages::{
    parse_client_message, ClientMessage, Envelope, Frame, ProtocolError, ServerMessage,
};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
pub use subscriptions::SubscriptionManager;
pub use topics::{Topic, UnknownTopic};
