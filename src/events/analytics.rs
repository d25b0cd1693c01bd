//! Dashboard analytics payloads
//!
//! `portfolio_analytics` is sent either as a full dashboard snapshot or as an
//! incremental delta carrying only the analytics fields that moved. The two
//! shapes are told apart by `update_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::normalize::iso8601;
use super::payloads::{AiInsight, NewsUpdate};

/// Headline portfolio figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSummary {
    pub portfolio_id: String,
    pub total_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub cash: f64,
    pub positions_count: u32,
}

/// Model-derived risk figures
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskMetrics {
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub value_at_risk: f64,
    pub beta: f64,
    pub max_drawdown: f64,
}

/// Weight of one holding or bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub name: String,
    /// Fraction of total value, 0..=1
    pub weight: f64,
    pub market_value: f64,
}

/// Everything the producer knows this tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSnapshot {
    pub summary: PortfolioSummary,
    pub risk: RiskMetrics,
    pub allocations: Vec<Allocation>,
    /// Newest first
    pub news: Vec<NewsUpdate>,
    /// Newest first
    pub insights: Vec<AiInsight>,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

/// The numeric analytics compared between ticks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsFields {
    pub total_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub value_at_risk: f64,
    pub beta: f64,
    pub max_drawdown: f64,
}

impl DashboardSnapshot {
    pub fn fields(&self) -> AnalyticsFields {
        AnalyticsFields {
            total_value: self.summary.total_value,
            pnl: self.summary.pnl,
            pnl_pct: self.summary.pnl_pct,
            volatility: self.risk.volatility,
            sharpe_ratio: self.risk.sharpe_ratio,
            value_at_risk: self.risk.value_at_risk,
            beta: self.risk.beta,
            max_drawdown: self.risk.max_drawdown,
        }
    }
}

/// Fields that changed since the last broadcast; unchanged ones are omitted
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldDelta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub volatility: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sharpe_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value_at_risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub beta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_drawdown: Option<f64>,
}

fn changed(previous: f64, current: f64) -> Option<f64> {
    let scale = previous.abs().max(current.abs()).max(1.0);
    if (current - previous).abs() > 1e-9 * scale {
        Some(current)
    } else {
        None
    }
}

impl FieldDelta {
    /// Compare two sets of analytics field by field
    pub fn between(previous: &AnalyticsFields, current: &AnalyticsFields) -> Self {
        Self {
            total_value: changed(previous.total_value, current.total_value),
            pnl: changed(previous.pnl, current.pnl),
            pnl_pct: changed(previous.pnl_pct, current.pnl_pct),
            volatility: changed(previous.volatility, current.volatility),
            sharpe_ratio: changed(previous.sharpe_ratio, current.sharpe_ratio),
            value_at_risk: changed(previous.value_at_risk, current.value_at_risk),
            beta: changed(previous.beta, current.beta),
            max_drawdown: changed(previous.max_drawdown, current.max_drawdown),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FieldDelta::default()
    }
}

/// Complete dashboard state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullAnalytics {
    pub summary: PortfolioSummary,
    pub risk: RiskMetrics,
    pub allocations: Vec<Allocation>,
    pub news: Vec<NewsUpdate>,
    pub insights: Vec<AiInsight>,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

/// Only what moved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncrementalAnalytics {
    pub portfolio_id: String,
    #[serde(flatten)]
    pub changes: FieldDelta,
    #[serde(with = "iso8601")]
    pub as_of: DateTime<Utc>,
}

/// `portfolio_analytics` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "update_type", rename_all = "snake_case")]
pub enum AnalyticsPayload {
    Full(FullAnalytics),
    Incremental(IncrementalAnalytics),
}

impl AnalyticsPayload {
    pub fn is_incremental(&self) -> bool {
        matches!(self, AnalyticsPayload::Incremental(_))
    }
}
