//! # Pulsecast
//!
//! Real-time event distribution for analytics dashboards: producers push
//! typed events from any thread, and connected WebSocket clients receive the
//! ones they subscribed to.
//!
//! ## Features
//!
//! - **Topic subscriptions**: clients pick topics, or receive everything by default
//! - **Serialize once**: each broadcast is encoded a single time for all recipients
//! - **Cross-thread dispatch**: fire-and-forget hand-off into the server runtime
//! - **Tiered updates**: full snapshots on a clock, deltas only when values move
//! - **Keepalive**: silent peers are pinged and eventually dropped
//!
//! ## Modules
//!
//! - [`websocket`]: connection registry, subscriptions, broadcaster, transport
//! - [`events`]: payload schemas and normalization
//! - [`dispatch`]: hand-off from producer threads
//! - [`significance`] and [`tiering`]: full/incremental/skip decisions
//! - [`server`]: thread and runtime lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use pulsecast::{BreachDirection, EventServer, ServerConfig, ThresholdBreach};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = EventServer::new(ServerConfig::new("127.0.0.1", 8765));
//!     server.start()?;
//!
//!     // From any thread
//!     let dispatcher = server.dispatcher();
//!     dispatcher.broadcast_threshold_breach(ThresholdBreach {
//!         symbol: "SPY".to_string(),
//!         metric: "realized_vol".to_string(),
//!         value: 0.31,
//!         threshold: 0.25,
//!         direction: BreachDirection::Above,
//!         detected_at: Utc::now(),
//!     });
//!
//!     server.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod events;
pub mod logging;
pub mod server;
pub mod significance;
pub mod tiering;
pub mod websocket;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, LoggingConfig, ServerConfig, SignificanceConfig};

pub use dispatch::{CrossContextDispatcher, RuntimeLink};

pub use events::{
    AiInsight, AlertSeverity, AnalyticsPayload, BreachDirection, DashboardSnapshot, Event,
    NewsUpdate, PerformanceUpdate, PortfolioUpdate, PositionUpdate, RiskAlert, StatisticsUpdate,
    ThresholdBreach, TradeEvent, TradeSide, VolatilityEstimate,
};

pub use server::{EventServer, ServerError};

pub use significance::{ChangeRecord, ChangeSignificanceEvaluator, SignificancePolicy, UpdateTier};

pub use tiering::PortfolioTiering;

pub use websocket::{BroadcastReport, EventBroadcaster, HubError, Topic};
