//! Event Broadcaster
//!
//! Owns the connection registry and the subscription map and fans broadcast
//! events out to every connection whose subscriptions match.
//!
//! A broadcast copies the live set, filters it, sends one shared frame to each
//! target and afterwards drops every connection whose queue was closed. A
//! failing recipient never stops delivery to the others.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use super::messages::{Envelope, Frame, ServerMessage};
use super::registry::{ConnectionId, ConnectionRegistry, ConnectionState};
use super::subscriptions::SubscriptionManager;
use super::topics::Topic;
use crate::events::{normalize, Event};

/// Subscription-filtered fan-out over all live connections
pub struct EventBroadcaster {
    /// Registry and subscriptions change together under one lock
    state: RwLock<HubState>,
    /// Mirror of the registry size, readable without the lock
    live: AtomicUsize,
    counters: Counters,
}

struct HubState {
    registry: ConnectionRegistry,
    subscriptions: SubscriptionManager,
}

impl HubState {
    fn drop_connection(&mut self, id: &str) -> bool {
        self.subscriptions.forget(id);
        self.registry.remove(id).is_some()
    }
}

/// Configuration for the broadcaster
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections whose subscriptions matched
    pub targeted: usize,
    pub delivered: usize,
    /// Connections removed because the send failed
    pub dropped: usize,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Cumulative counters since the broadcaster was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub events: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub live_connections: usize,
}

impl EventBroadcaster {
    /// Create a new broadcaster
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            state: RwLock::new(HubState {
                registry: ConnectionRegistry::new(config.max_connections),
                subscriptions: SubscriptionManager::new(),
            }),
            live: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Register a new WebSocket connection
    ///
    /// The handshake listing available topics is queued on `sender` before
    /// this returns. Fails when the connection limit is reached.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<ConnectionId, HubError> {
        let mut state = self.state.write().await;
        let id = state.registry.register(sender)?;
        state.subscriptions.track(&id);
        self.live.store(state.registry.len(), Ordering::Relaxed);

        tracing::info!(connection_id = %id, "WebSocket connected");
        Ok(id)
    }

    /// Unregister a connection and clean up its subscriptions
    pub async fn unregister(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.drop_connection(id);
        self.live.store(state.registry.len(), Ordering::Relaxed);

        if removed {
            tracing::info!(connection_id = %id, "WebSocket disconnected");
        }
        removed
    }

    /// Drop every connection
    ///
    /// Closing each outbound queue ends the connection's writer, which closes
    /// the socket. Returns how many connections were dropped.
    pub async fn close_all(&self) -> usize {
        let mut state = self.state.write().await;
        let ids: Vec<ConnectionId> = state
            .registry
            .snapshot()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for id in &ids {
            state.registry.mark_closing(id);
            state.drop_connection(id);
        }
        self.live.store(state.registry.len(), Ordering::Relaxed);

        tracing::info!(closed = ids.len(), "Closed all connections");
        ids.len()
    }

    /// Subscribe a connection to topics; returns the resulting set
    pub async fn subscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<Topic>, HubError> {
        let mut state = self.state.write().await;
        let subscribed = state
            .subscriptions
            .subscribe(id, &topics)
            .ok_or_else(|| HubError::ConnectionNotFound(id.to_string()))?;

        tracing::debug!(
            connection_id = %id,
            requested = ?topics,
            topics = ?subscribed,
            "Subscribed to topics"
        );
        Ok(subscribed)
    }

    /// Unsubscribe a connection from topics
    ///
    /// Returns the recognised requested topics and the remaining set.
    pub async fn unsubscribe(
        &self,
        id: &str,
        topics: Vec<String>,
    ) -> Result<(Vec<Topic>, Vec<Topic>), HubError> {
        let mut state = self.state.write().await;
        let (removed, remaining) = state
            .subscriptions
            .unsubscribe(id, &topics)
            .ok_or_else(|| HubError::ConnectionNotFound(id.to_string()))?;

        tracing::debug!(
            connection_id = %id,
            topics = ?removed,
            remaining = ?remaining,
            "Unsubscribed from topics"
        );
        Ok((removed, remaining))
    }

    /// Current subscription set of a connection
    pub async fn subscriptions_of(&self, id: &str) -> Option<Vec<Topic>> {
        let state = self.state.read().await;
        state
            .subscriptions
            .topics(id)
            .map(|topics| topics.iter().copied().collect())
    }

    /// Broadcast a payload to all matching connections
    ///
    /// The payload is normalized and stamped before anything is sent. Only a
    /// payload that cannot be serialized, or the `all` wildcard used as a
    /// topic, is an error; delivery failures are reported in the returned
    /// [`BroadcastReport`].
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        topic: Topic,
        payload: &T,
    ) -> Result<BroadcastReport, HubError> {
        let data = normalize(payload)?;
        self.deliver(Envelope::new(topic, data)).await
    }

    /// Broadcast a typed event, logging instead of returning errors
    pub async fn publish(&self, event: Event) -> BroadcastReport {
        let topic = event.topic();
        let result = match event.to_data() {
            Ok(data) => self.deliver(Envelope::new(topic, data)).await,
            Err(e) => Err(HubError::Serialization(e)),
        };

        result.unwrap_or_else(|e| {
            tracing::error!(topic = %topic, error = %e, "Failed to broadcast event");
            BroadcastReport::default()
        })
    }

    async fn deliver(&self, envelope: Envelope) -> Result<BroadcastReport, HubError> {
        let topic = envelope.topic;
        if topic == Topic::All {
            return Err(HubError::WildcardTopic);
        }
        let frame = envelope.to_frame()?;

        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<Frame>)> = {
            let state = self.state.read().await;
            state
                .registry
                .snapshot()
                .into_iter()
                .filter(|(id, _)| state.subscriptions.wants(id, topic))
                .collect()
        };

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..Default::default()
        };
        let mut failed = Vec::new();
        for (id, sender) in targets {
            if sender.send(Arc::clone(&frame)).is_ok() {
                report.delivered += 1;
            } else {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.write().await;
            for id in &failed {
                state.registry.mark_closing(id);
                if state.drop_connection(id) {
                    report.dropped += 1;
                    tracing::debug!(
                        connection_id = %id,
                        topic = %topic,
                        "Send failed, dropping connection"
                    );
                }
            }
            self.live.store(state.registry.len(), Ordering::Relaxed);
        }

        self.counters.events.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        if report.targeted > 0 {
            tracing::trace!(
                topic = %topic,
                delivered = report.delivered,
                dropped = report.dropped,
                "Broadcast event"
            );
        }

        Ok(report)
    }

    /// Send a control message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: &ServerMessage) -> Result<(), HubError> {
        let frame = message.to_frame()?;
        let state = self.state.read().await;
        let connection = state
            .registry
            .get(id)
            .ok_or_else(|| HubError::ConnectionNotFound(id.to_string()))?;

        connection.sender.send(frame).map_err(|_| HubError::SendFailed)
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Connection count without waiting for the lock; safe from any thread
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Connections that explicitly subscribed to `topic`
    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.state.read().await.subscriptions.subscriber_count(topic)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events: self.counters.events.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            live_connections: self.live_connections(),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

/// Errors that can occur in the broadcaster
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Failed to send message")]
    SendFailed,

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `all` is a subscription wildcard, not an event type
    #[error("Cannot broadcast to the \"all\" wildcard topic")]
    WildcardTopic,

    #[error("Invalid connection state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn decode(frame: &Frame) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    /// Register and discard the handshake
    async fn connect(
        hub: &EventBroadcaster,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        let handshake = rx.try_recv().unwrap();
        assert_eq!(decode(&handshake)["type"], "connection");
        (id, rx)
    }

    #[test]
    fn test_default_config() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.max_connections, 1000);
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = EventBroadcaster::default();
        let (id, _rx) = connect(&hub).await;
        assert!(!id.is_empty());
        assert_eq!(hub.connection_count().await, 1);
        assert_eq!(hub.live_connections(), 1);

        assert!(hub.unregister(&id).await);
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.live_connections(), 0);
        assert!(hub.subscriptions_of(&id).await.is_none());
        assert!(!hub.unregister(&id).await);
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let hub = EventBroadcaster::default();
        let (id, _rx) = connect(&hub).await;

        let subscribed = hub
            .subscribe(&id, vec!["threshold_breach".to_string(), "not_a_topic".to_string()])
            .await
            .unwrap();
        assert_eq!(subscribed, vec![Topic::ThresholdBreach]);
        assert_eq!(hub.subscriber_count(Topic::ThresholdBreach).await, 1);

        let (removed, remaining) = hub
            .unsubscribe(&id, vec!["threshold_breach".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, vec![Topic::ThresholdBreach]);
        assert!(remaining.is_empty());
        assert_eq!(hub.subscriber_count(Topic::ThresholdBreach).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection() {
        let hub = EventBroadcaster::default();
        let result = hub.subscribe("ghost", vec!["all".to_string()]).await;
        assert!(matches!(result, Err(HubError::ConnectionNotFound(_))));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = EventBroadcaster::new(BroadcasterConfig { max_connections: 2 });

        let (_id1, _rx1) = connect(&hub).await;
        let (_id2, _rx2) = connect(&hub).await;
        let (tx3, _rx3) = mpsc::unbounded_channel();
        let result = hub.register(tx3).await;

        assert!(matches!(result, Err(HubError::TooManyConnections(2))));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Too many connections (limit: 2)"
        );
    }

    #[tokio::test]
    async fn test_broadcast_to_subscribers() {
        let hub = EventBroadcaster::default();
        let (id1, mut rx1) = connect(&hub).await;
        let (id2, mut rx2) = connect(&hub).await;

        hub.subscribe(&id1, vec!["threshold_breach".to_string()])
            .await
            .unwrap();
        hub.subscribe(&id2, vec!["news_update".to_string()])
            .await
            .unwrap();

        let report = hub
            .broadcast(Topic::ThresholdBreach, &json!({"symbol": "SPY", "value": 0.31}))
            .await
            .unwrap();
        assert_eq!(
            report,
            BroadcastReport {
                targeted: 1,
                delivered: 1,
                dropped: 0
            }
        );

        let msg = decode(&rx1.try_recv().unwrap());
        assert_eq!(msg["type"], "threshold_breach");
        assert_eq!(msg["data"]["symbol"], "SPY");
        assert!(msg["timestamp"].is_string());

        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_subscription_receives_everything() {
        let hub = EventBroadcaster::default();
        let (_id, mut rx) = connect(&hub).await;

        hub.broadcast(Topic::RiskAlert, &json!({"message": "limit"}))
            .await
            .unwrap();
        hub.broadcast(Topic::AiInsight, &json!({"title": "x"}))
            .await
            .unwrap();

        assert_eq!(decode(&rx.try_recv().unwrap())["type"], "risk_alert");
        assert_eq!(decode(&rx.try_recv().unwrap())["type"], "ai_insight");
    }

    #[tokio::test]
    async fn test_all_subscription() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;
        hub.subscribe(&id, vec!["all".to_string()]).await.unwrap();

        hub.broadcast(Topic::PositionUpdate, &json!({"symbol": "AAPL"}))
            .await
            .unwrap();
        assert_eq!(decode(&rx.try_recv().unwrap())["type"], "position_update");
    }

    #[tokio::test]
    async fn test_broadcast_without_clients() {
        let hub = EventBroadcaster::default();
        let report = hub
            .broadcast(Topic::StatisticsUpdate, &json!({"mean": 0.1}))
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(hub.stats().events, 1);
    }

    #[tokio::test]
    async fn test_failed_recipient_is_pruned() {
        let hub = EventBroadcaster::default();
        let (_id1, mut rx1) = connect(&hub).await;
        let (id2, rx2) = connect(&hub).await;
        let (_id3, mut rx3) = connect(&hub).await;

        // Second client goes away mid-stream
        drop(rx2);

        let report = hub
            .broadcast(Topic::PortfolioUpdate, &json!({"total_value": 1.0}))
            .await
            .unwrap();
        assert_eq!(report.targeted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);

        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
        assert_eq!(hub.connection_count().await, 2);
        assert!(hub.subscriptions_of(&id2).await.is_none());

        let stats = hub.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.live_connections, 2);
    }

    #[tokio::test]
    async fn test_wildcard_topic_is_not_broadcast() {
        let hub = EventBroadcaster::default();
        let (_id, mut rx) = connect(&hub).await;

        let result = hub.broadcast(Topic::All, &json!({"value": 1})).await;
        assert!(matches!(result, Err(HubError::WildcardTopic)));

        let report = hub
            .publish(Event::Raw {
                topic: Topic::All,
                data: json!({}),
            })
            .await;
        assert_eq!(report.targeted, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().events, 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_queues() {
        let hub = EventBroadcaster::default();
        let (_id1, mut rx1) = connect(&hub).await;
        let (_id2, mut rx2) = connect(&hub).await;

        assert_eq!(hub.close_all().await, 2);
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.live_connections(), 0);

        // Senders are gone, so the writers see the end of their queue
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_typed_event() {
        let hub = EventBroadcaster::default();
        let (_id, mut rx) = connect(&hub).await;

        let report = hub
            .publish(Event::Raw {
                topic: Topic::AllTrades,
                data: json!({"trade_id": "t-1", "price": 101.5}),
            })
            .await;
        assert_eq!(report.delivered, 1);

        let msg = decode(&rx.try_recv().unwrap());
        assert_eq!(msg["type"], "all_trades");
        assert_eq!(msg["data"]["price"], 101.5);
    }

    #[tokio::test]
    async fn test_send_to() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;

        hub.send_to(&id, &ServerMessage::pong()).await.unwrap();
        assert_eq!(decode(&rx.try_recv().unwrap())["type"], "pong");

        let missing = hub.send_to("ghost", &ServerMessage::pong()).await;
        assert!(matches!(missing, Err(HubError::ConnectionNotFound(_))));
    }
}
