//! Per-topic payload schemas
//!
//! Producers build one of these structs; [`Event`] ties each to its topic.
//! Dynamic producers that only have a JSON map use [`Event::Raw`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::analytics::AnalyticsPayload;
use super::normalize::{iso8601, normalize};
use crate::websocket::Topic;

/// Direction of a threshold crossing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BreachDirection {
    Above,
    Below,
}

/// Volatility crossed a configured threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdBreach {
    pub symbol: String,
    /// Name of the breached measure (e.g. `realized_vol`)
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub direction: BreachDirection,
    #[serde(with = "iso8601")]
    pub detected_at: DateTime<Utc>,
}

/// Side of an executed trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    #[serde(with = "iso8601")]
    pub executed_at: DateTime<Utc>,
}

/// Rolling window statistics for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsUpdate {
    pub symbol: String,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: u64,
    #[serde(with = "iso8601")]
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilityEstimate {
    pub symbol: String,
    /// Per-period estimate
    pub estimate: f64,
    pub annualized: f64,
    /// Model that produced the estimate (e.g. `ar1`)
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence_interval: Option<(f64, f64)>,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioUpdate {
    pub portfolio_id: String,
    pub total_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub positions_count: u32,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceUpdate {
    pub portfolio_id: String,
    /// Period label (`1d`, `1w`, `ytd`, ...) to return
    pub returns: BTreeMap<String, f64>,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsUpdate {
    pub headline: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Sentiment score in [-1, 1]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sentiment: Option<f64>,
    #[serde(with = "iso8601")]
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiInsight {
    pub title: String,
    pub body: String,
    pub confidence: f64,
    #[serde(default)]
    pub related_symbols: Vec<String>,
    #[serde(with = "iso8601")]
    pub generated_at: DateTime<Utc>,
}

/// Severity of a risk alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAlert {
    pub severity: AlertSeverity,
    /// Limit family (`drawdown`, `concentration`, `var`, ...)
    pub category: String,
    pub message: String,
    pub metric_value: f64,
    pub limit: f64,
    #[serde(with = "iso8601")]
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionUpdate {
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

/// One produced event, tagged by topic
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ThresholdBreach(ThresholdBreach),
    Trade(TradeEvent),
    Statistics(StatisticsUpdate),
    VolatilityEstimate(VolatilityEstimate),
    PortfolioUpdate(PortfolioUpdate),
    PortfolioAnalytics(AnalyticsPayload),
    Performance(PerformanceUpdate),
    News(NewsUpdate),
    AiInsight(AiInsight),
    RiskAlert(RiskAlert),
    PositionUpdate(PositionUpdate),
    /// Untyped payload for producers that build maps dynamically
    Raw { topic: Topic, data: Value },
}

impl Event {
    /// Topic this event is delivered under
    pub fn topic(&self) -> Topic {
        match self {
            Event::ThresholdBreach(_) => Topic::ThresholdBreach,
            Event::Trade(_) => Topic::AllTrades,
            Event::Statistics(_) => Topic::StatisticsUpdate,
            Event::VolatilityEstimate(_) => Topic::VolatilityEstimate,
            Event::PortfolioUpdate(_) => Topic::PortfolioUpdate,
            Event::PortfolioAnalytics(_) => Topic::PortfolioAnalytics,
            Event::Performance(_) => Topic::PerformanceUpdate,
            Event::News(_) => Topic::NewsUpdate,
            Event::AiInsight(_) => Topic::AiInsight,
            Event::RiskAlert(_) => Topic::RiskAlert,
            Event::PositionUpdate(_) => Topic::PositionUpdate,
            Event::Raw { topic, .. } => *topic,
        }
    }

    /// Normalized `data` object for the envelope
    pub fn to_data(&self) -> Result<Value, serde_json::Error> {
        match self {
            Event::ThresholdBreach(p) => normalize(p),
            Event::Trade(p) => normalize(p),
            Event::Statistics(p) => normalize(p),
            Event::VolatilityEstimate(p) => normalize(p),
            Event::PortfolioUpdate(p) => normalize(p),
            Event::PortfolioAnalytics(p) => normalize(p),
            Event::Performance(p) => normalize(p),
            Event::News(p) => normalize(p),
            Event::AiInsight(p) => normalize(p),
            Event::RiskAlert(p) => normalize(p),
            Event::PositionUpdate(p) => normalize(p),
            Event::Raw { data, .. } => normalize(data),
        }
    }
}
