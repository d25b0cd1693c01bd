//! Cross-Context Dispatch
//!
//! The metrics producer runs on its own thread and must never wait on network
//! I/O. [`CrossContextDispatcher`] gives it plain synchronous methods that hand
//! each broadcast to the server's runtime and return immediately.
//!
//! Delivery is at-most-once: when the server is not running the event is
//! dropped, and nothing is queued or retried.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;

use crate::events::{
    AiInsight, AnalyticsPayload, Event, NewsUpdate, PerformanceUpdate, PortfolioUpdate,
    PositionUpdate, RiskAlert, StatisticsUpdate, ThresholdBreach, TradeEvent, VolatilityEstimate,
};
use crate::websocket::{EventBroadcaster, Topic};

/// Link between producer threads and the runtime that owns the connections
///
/// The server attaches its runtime handle once it is accepting connections
/// and detaches it when it stops.
#[derive(Debug, Default)]
pub struct RuntimeLink {
    running: AtomicBool,
    handle: RwLock<Option<Handle>>,
}

impl RuntimeLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: Handle) {
        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.running.store(true, Ordering::Release);
    }

    /// Attach unless `abandoned` reports true; checked under the same lock
    /// `detach` takes, so a concurrent detach is never overtaken
    pub fn attach_unless(&self, handle: Handle, abandoned: impl FnOnce() -> bool) -> bool {
        let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        if abandoned() {
            return false;
        }
        *slot = Some(handle);
        self.running.store(true, Ordering::Release);
        true
    }

    /// Stop accepting work without releasing the handle yet
    pub fn mark_stopping(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn detach(&self) {
        self.running.store(false, Ordering::Release);
        self.handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Schedule `task` on the attached runtime; false if nothing is running
    ///
    /// Safe to call from any thread, never blocks on the task.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return false;
        }

        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(handle) => {
                handle.spawn(task);
                true
            }
            None => false,
        }
    }
}

/// Fire-and-forget broadcast entry points for producer threads
#[derive(Clone)]
pub struct CrossContextDispatcher {
    broadcaster: Arc<EventBroadcaster>,
    link: Arc<RuntimeLink>,
}

impl CrossContextDispatcher {
    pub fn new(broadcaster: Arc<EventBroadcaster>, link: Arc<RuntimeLink>) -> Self {
        Self { broadcaster, link }
    }

    /// Hand an event to the runtime
    ///
    /// Returns whether it was scheduled. `false` means the event was dropped,
    /// either because the server is not running or because its topic is the
    /// `all` wildcard.
    pub fn dispatch(&self, event: Event) -> bool {
        let topic = event.topic();
        if topic == Topic::All {
            tracing::warn!("Refusing to broadcast to the \"all\" wildcard topic");
            return false;
        }
        let broadcaster = Arc::clone(&self.broadcaster);
        let scheduled = self.link.spawn(async move {
            broadcaster.publish(event).await;
        });

        if !scheduled {
            tracing::trace!(topic = %topic, "Server not running, event dropped");
        }
        scheduled
    }

    pub fn is_running(&self) -> bool {
        self.link.is_running()
    }

    /// Number of live connections, readable from the producer thread
    pub fn connected_clients(&self) -> usize {
        self.broadcaster.live_connections()
    }

    pub fn broadcast_threshold_breach(&self, breach: ThresholdBreach) {
        self.dispatch(Event::ThresholdBreach(breach));
    }

    pub fn broadcast_trade(&self, trade: TradeEvent) {
        self.dispatch(Event::Trade(trade));
    }

    pub fn broadcast_statistics(&self, stats: StatisticsUpdate) {
        self.dispatch(Event::Statistics(stats));
    }

    pub fn broadcast_volatility_estimate(&self, estimate: VolatilityEstimate) {
        self.dispatch(Event::VolatilityEstimate(estimate));
    }

    pub fn broadcast_portfolio_update(&self, update: PortfolioUpdate) {
        self.dispatch(Event::PortfolioUpdate(update));
    }

    pub fn broadcast_portfolio_analytics(&self, analytics: AnalyticsPayload) {
        self.dispatch(Event::PortfolioAnalytics(analytics));
    }

    pub fn broadcast_performance(&self, performance: PerformanceUpdate) {
        self.dispatch(Event::Performance(performance));
    }

    pub fn broadcast_news(&self, news: NewsUpdate) {
        self.dispatch(Event::News(news));
    }

    pub fn broadcast_ai_insight(&self, insight: AiInsight) {
        self.dispatch(Event::AiInsight(insight));
    }

    pub fn broadcast_risk_alert(&self, alert: RiskAlert) {
        self.dispatch(Event::RiskAlert(alert));
    }

    pub fn broadcast_position_update(&self, position: PositionUpdate) {
        self.dispatch(Event::PositionUpdate(position));
    }

    /// Broadcast a dynamically built JSON payload
    pub fn broadcast_raw(&self, topic: Topic, data: serde_json::Value) {
        self.dispatch(Event::Raw { topic, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertSeverity;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn alert() -> RiskAlert {
        RiskAlert {
            severity: AlertSeverity::Critical,
            category: "drawdown".to_string(),
            message: "Drawdown limit breached".to_string(),
            metric_value: -0.12,
            limit: -0.10,
            raised_at: Utc::now(),
        }
    }

    #[test]
    fn test_dispatch_without_runtime_is_noop() {
        let broadcaster = Arc::new(EventBroadcaster::default());
        let dispatcher = CrossContextDispatcher::new(broadcaster, Arc::new(RuntimeLink::new()));

        assert!(!dispatcher.is_running());
        assert!(!dispatcher.dispatch(Event::RiskAlert(alert())));
        dispatcher.broadcast_risk_alert(alert());
        assert_eq!(dispatcher.connected_clients(), 0);
    }

    #[test]
    fn test_dispatch_from_foreign_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let broadcaster = Arc::new(EventBroadcaster::default());
        let link = Arc::new(RuntimeLink::new());
        link.attach(runtime.handle().clone());
        let dispatcher = CrossContextDispatcher::new(Arc::clone(&broadcaster), Arc::clone(&link));

        let (tx, mut rx) = mpsc::unbounded_channel();
        runtime.block_on(broadcaster.register(tx)).unwrap();
        assert_eq!(dispatcher.connected_clients(), 1);

        let producer = dispatcher.clone();
        std::thread::spawn(move || {
            producer.broadcast_raw(Topic::VolatilityEstimate, json!({"symbol": "SPY", "estimate": 0.18}));
        })
        .join()
        .unwrap();

        let frames = runtime.block_on(async {
            let handshake = rx.recv().await.unwrap();
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            (handshake, event)
        });

        let event: Value = serde_json::from_str(&frames.1).unwrap();
        assert_eq!(event["type"], "volatility_estimate");
        assert_eq!(event["data"]["estimate"], 0.18);

        link.detach();
        assert!(!dispatcher.dispatch(Event::RiskAlert(alert())));
    }

    #[test]
    fn test_wildcard_topic_is_dropped() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let link = Arc::new(RuntimeLink::new());
        link.attach(runtime.handle().clone());
        let dispatcher = CrossContextDispatcher::new(Arc::new(EventBroadcaster::default()), link);

        assert!(!dispatcher.dispatch(Event::Raw {
            topic: Topic::All,
            data: json!({"value": 1}),
        }));
        assert!(dispatcher.dispatch(Event::Raw {
            topic: Topic::NewsUpdate,
            data: json!({"value": 1}),
        }));
    }

    #[test]
    fn test_attach_unless_abandoned() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let link = RuntimeLink::new();

        assert!(!link.attach_unless(runtime.handle().clone(), || true));
        assert!(!link.is_running());

        assert!(link.attach_unless(runtime.handle().clone(), || false));
        assert!(link.is_running());
    }

    #[test]
    fn test_mark_stopping_refuses_work() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let link = RuntimeLink::new();
        link.attach(runtime.handle().clone());
        assert!(link.spawn(async {}));

        link.mark_stopping();
        assert!(!link.spawn(async {}));
    }
}
