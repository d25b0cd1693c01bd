//! Event payloads
//!
//! Typed schemas for everything the producer side can broadcast, and the
//! normalization step that turns them into plain JSON before they reach the
//! transport.

pub mod analytics;
mod normalize;
mod payloads;

pub use analytics::{
    Allocation, AnalyticsFields, AnalyticsPayload, DashboardSnapshot, FieldDelta, FullAnalytics,
    IncrementalAnalytics, PortfolioSummary, RiskMetrics,
};
pub use normalize::{format_timestamp, iso8601, normalize};
pub use payloads::{
    AiInsight, AlertSeverity, BreachDirection, Event, NewsUpdate, PerformanceUpdate,
    PortfolioUpdate, PositionUpdate, RiskAlert, StatisticsUpdate, ThresholdBreach, TradeEvent,
    TradeSide, VolatilityEstimate,
};
