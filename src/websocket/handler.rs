//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and drives one connection from
//! registration to cleanup.
//!
//! Each connection runs two tasks: a writer draining the connection's outbound
//! queue (and originating keepalive pings), and a reader handling control
//! messages. When either finishes the other is aborted and the connection is
//! unregistered.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};

use super::broadcaster::EventBroadcaster;
use super::messages::{parse_client_message, ClientMessage, Frame, ProtocolError, ServerMessage};

/// Transport-level keepalive settings
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    /// How often the server pings an idle peer
    pub interval: Duration,
    /// Extra grace after a missed pong before the peer is dropped
    pub timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Shared state handed to every connection
#[derive(Clone)]
pub struct TransportContext {
    pub broadcaster: Arc<EventBroadcaster>,
    /// `None` disables server pings and idle reaping
    pub keepalive: Option<Keepalive>,
    /// Flips to `true` when the server stops
    pub shutdown: watch::Receiver<bool>,
}

/// Router accepting WebSocket upgrades on `/` and `/ws`
pub fn router(ctx: TransportContext) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .with_state(ctx)
}

/// WebSocket upgrade handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(ctx): State<TransportContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Tracks when the peer was last heard from
struct Liveness {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last_seen)
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, ctx: TransportContext) {
    let (mut sender, receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let hub = Arc::clone(&ctx.broadcaster);

    // Registration queues the handshake on `tx`
    let connection_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket connection");
            if let Ok(frame) = ServerMessage::error(e.to_string()).to_frame() {
                let _ = sender.send(Message::Text(frame.to_string())).await;
            }
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: "connection limit reached".into(),
                })))
                .await;
            return;
        }
    };

    let liveness = Arc::new(Liveness::new());

    let mut send_task = tokio::spawn(write_loop(
        sender,
        rx,
        ctx.keepalive,
        ctx.shutdown.clone(),
        Arc::clone(&liveness),
        connection_id.clone(),
    ));

    let mut recv_task = tokio::spawn(read_loop(
        receiver,
        Arc::clone(&hub),
        connection_id.clone(),
        liveness,
    ));

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unregister(&connection_id).await;
}

/// Forward queued frames to the socket, ping idle peers, close on shutdown
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    keepalive: Option<Keepalive>,
    mut shutdown: watch::Receiver<bool>,
    liveness: Arc<Liveness>,
    connection_id: String,
) {
    let mut pings = keepalive.and_then(ping_timer);

    if *shutdown.borrow() {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        tracing::debug!(
                            connection_id = %connection_id,
                            "WebSocket send failed, closing connection"
                        );
                        break;
                    }
                }
                // Dropped from the registry
                None => {
                    let _ = sink.send(going_away()).await;
                    break;
                }
            },
            Some(keepalive) = next_ping(&mut pings, keepalive) => {
                if liveness.silent_for() > keepalive.interval + keepalive.timeout {
                    tracing::info!(connection_id = %connection_id, "Keepalive timed out");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            },
            _ = shutdown.changed() => {
                let _ = sink.send(going_away()).await;
                break;
            }
        }
    }
}

/// Ping timer for `keepalive`; a zero interval disables pings
fn ping_timer(keepalive: Keepalive) -> Option<Interval> {
    if keepalive.interval.is_zero() {
        return None;
    }
    let mut timer = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive.interval,
        keepalive.interval,
    );
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

/// Resolves on the next ping tick, never when keepalive is off
async fn next_ping(timer: &mut Option<Interval>, keepalive: Option<Keepalive>) -> Option<Keepalive> {
    match timer {
        Some(timer) => {
            timer.tick().await;
            keepalive
        }
        None => std::future::pending().await,
    }
}

fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: "server closing connection".into(),
    }))
}

/// Receive client messages until the peer closes or errors
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: Arc<EventBroadcaster>,
    connection_id: String,
    liveness: Arc<Liveness>,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(message) => {
                liveness.touch();
                if !handle_ws_message(&hub, &connection_id, message).await {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
        }
    }
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(hub: &EventBroadcaster, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match parse_client_message(&text) {
                Ok(client_msg) => handle_client_message(hub, connection_id, client_msg).await,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Invalid client message"
                    );
                    reply(hub, connection_id, ServerMessage::error(e.to_string())).await;
                }
            }
            true
        }
        Message::Binary(_) => {
            reply(hub, connection_id, ServerMessage::error(ProtocolError::Binary.to_string())).await;
            true
        }
        // Axum answers pings itself; pongs only refresh liveness
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

/// Handle a parsed client message
pub(crate) async fn handle_client_message(
    hub: &EventBroadcaster,
    connection_id: &str,
    message: ClientMessage,
) {
    let response = match message {
        ClientMessage::Subscribe { events } => match hub.subscribe(connection_id, events).await {
            Ok(subscribed) => ServerMessage::SubscriptionConfirmed {
                subscribed_events: subscribed,
            },
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "Subscribe error");
                ServerMessage::error(e.to_string())
            }
        },
        ClientMessage::Unsubscribe { events } => {
            match hub.unsubscribe(connection_id, events).await {
                Ok((unsubscribed, remaining)) => ServerMessage::UnsubscriptionConfirmed {
                    unsubscribed_events: unsubscribed,
                    remaining_subscriptions: remaining,
                },
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "Unsubscribe error");
                    ServerMessage::error(e.to_string())
                }
            }
        }
        ClientMessage::Ping => ServerMessage::pong(),
    };

    reply(hub, connection_id, response).await;
}

async fn reply(hub: &EventBroadcaster, connection_id: &str, message: ServerMessage) {
    if let Err(e) = hub.send_to(connection_id, &message).await {
        tracing::debug!(connection_id = %connection_id, error = %e, "Failed to queue reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::Topic;
    use serde_json::Value;

    async fn connect(hub: &EventBroadcaster) -> (String, mpsc::UnboundedReceiver<Frame>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        rx.try_recv().unwrap();
        (id, rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<Frame>) -> ServerMessage {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_default_keepalive() {
        let keepalive = Keepalive::default();
        assert_eq!(keepalive.interval, Duration::from_secs(30));
        assert_eq!(keepalive.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_subscribe_confirms_resulting_set() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;

        let msg = ClientMessage::Subscribe {
            events: vec!["risk_alert".to_string()],
        };
        handle_client_message(&hub, &id, msg).await;
        let msg = ClientMessage::Subscribe {
            events: vec!["threshold_breach".to_string(), "not_a_topic".to_string()],
        };
        handle_client_message(&hub, &id, msg).await;

        next(&mut rx);
        assert_eq!(
            next(&mut rx),
            ServerMessage::SubscriptionConfirmed {
                subscribed_events: vec![Topic::ThresholdBreach, Topic::RiskAlert],
            }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_reports_remaining() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;
        hub.subscribe(&id, vec!["news_update".to_string(), "ai_insight".to_string()])
            .await
            .unwrap();

        let msg = ClientMessage::Unsubscribe {
            events: vec!["news_update".to_string()],
        };
        handle_client_message(&hub, &id, msg).await;
        assert_eq!(
            next(&mut rx),
            ServerMessage::UnsubscriptionConfirmed {
                unsubscribed_events: vec![Topic::NewsUpdate],
                remaining_subscriptions: vec![Topic::AiInsight],
            }
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;

        handle_client_message(&hub, &id, ClientMessage::Ping).await;
        let frame = rx.try_recv().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_malformed_text_keeps_connection_open() {
        let hub = EventBroadcaster::default();
        let (id, mut rx) = connect(&hub).await;

        let keep_open = handle_ws_message(&hub, &id, Message::Text("{oops".to_string())).await;
        assert!(keep_open);
        match next(&mut rx) {
            ServerMessage::Error { message } => assert!(message.starts_with("Invalid JSON")),
            other => panic!("Expected Error, got {:?}", other),
        }

        let keep_open =
            handle_ws_message(&hub, &id, Message::Text(r#"{"type":"dance"}"#.to_string())).await;
        assert!(keep_open);
        assert_eq!(
            next(&mut rx),
            ServerMessage::error("Unknown message type: dance")
        );

        assert!(handle_ws_message(&hub, &id, Message::Binary(vec![1, 2])).await);
        assert_eq!(next(&mut rx), ServerMessage::error("Binary messages not supported"));

        assert!(!handle_ws_message(&hub, &id, Message::Close(None)).await);
    }

    #[test]
    fn test_zero_interval_disables_pings() {
        let disabled = Keepalive {
            interval: Duration::ZERO,
            timeout: Duration::from_secs(10),
        };
        assert!(ping_timer(disabled).is_none());
    }

    #[tokio::test]
    async fn test_ping_timer_fires_after_interval() {
        let keepalive = Keepalive {
            interval: Duration::from_millis(20),
            timeout: Duration::ZERO,
        };
        let mut timer = ping_timer(keepalive);
        assert!(timer.is_some());

        let fired = tokio::time::timeout(
            Duration::from_secs(1),
            next_ping(&mut timer, Some(keepalive)),
        )
        .await
        .unwrap();
        assert_eq!(fired.map(|k| k.interval), Some(keepalive.interval));
    }

    #[tokio::test]
    async fn test_disabled_ping_never_fires() {
        let mut timer = None;
        let fired =
            tokio::time::timeout(Duration::from_millis(50), next_ping(&mut timer, None)).await;
        assert!(fired.is_err());
    }

    #[test]
    fn test_liveness_tracks_silence() {
        let liveness = Liveness::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(liveness.silent_for() >= Duration::from_millis(20));
        liveness.touch();
        assert!(liveness.silent_for() < Duration::from_millis(20));
    }
}
