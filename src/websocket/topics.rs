//! Subscription topics
//!
//! The closed set of event categories a client can subscribe to, plus the
//! `all` wildcard.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Named category of broadcast message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Volatility crossed a configured threshold
    ThresholdBreach,
    /// Every executed trade
    AllTrades,
    /// Rolling statistics for a symbol
    StatisticsUpdate,
    /// New volatility estimate from the model
    VolatilityEstimate,
    /// Portfolio value and P&L
    PortfolioUpdate,
    /// Dashboard analytics (full or incremental)
    PortfolioAnalytics,
    /// Performance figures (returns, drawdown, ratios)
    PerformanceUpdate,
    /// News headlines
    NewsUpdate,
    /// Generated commentary
    AiInsight,
    /// Risk limit alerts
    RiskAlert,
    /// Position changes
    PositionUpdate,
    /// Wildcard: every topic
    All,
}

impl Topic {
    /// Every topic a client may request, in wire order
    pub fn available() -> &'static [Topic] {
        &[
            Topic::ThresholdBreach,
            Topic::AllTrades,
            Topic::StatisticsUpdate,
            Topic::VolatilityEstimate,
            Topic::PortfolioUpdate,
            Topic::PortfolioAnalytics,
            Topic::PerformanceUpdate,
            Topic::NewsUpdate,
            Topic::AiInsight,
            Topic::RiskAlert,
            Topic::PositionUpdate,
            Topic::All,
        ]
    }

    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ThresholdBreach => "threshold_breach",
            Topic::AllTrades => "all_trades",
            Topic::StatisticsUpdate => "statistics_update",
            Topic::VolatilityEstimate => "volatility_estimate",
            Topic::PortfolioUpdate => "portfolio_update",
            Topic::PortfolioAnalytics => "portfolio_analytics",
            Topic::PerformanceUpdate => "performance_update",
            Topic::NewsUpdate => "news_update",
            Topic::AiInsight => "ai_insight",
            Topic::RiskAlert => "risk_alert",
            Topic::PositionUpdate => "position_update",
            Topic::All => "all",
        }
    }

    /// Keep only recognised topic names, in request order
    ///
    /// Unknown names are dropped silently; this is not an error.
    pub fn filter_known<I, S>(requested: I) -> Vec<Topic>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        requested
            .into_iter()
            .filter_map(|name| name.as_ref().parse().ok())
            .collect()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known topic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::available()
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for topic in Topic::available() {
            let parsed: Topic = topic.as_str().parse().unwrap();
            assert_eq!(parsed, *topic);
        }
        assert_eq!(Topic::available().len(), 12);
    }

    #[test]
    fn test_unknown_topic() {
        let err = "not_a_topic".parse::<Topic>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown topic: not_a_topic");
        assert!("".parse::<Topic>().is_err());
        assert!("ThresholdBreach".parse::<Topic>().is_err());
    }

    #[test]
    fn test_filter_known_drops_unknown() {
        let topics = Topic::filter_known(["threshold_breach", "not_a_topic", "all"]);
        assert_eq!(topics, vec![Topic::ThresholdBreach, Topic::All]);
    }

    #[test]
    fn test_serde_matches_display() {
        let json = serde_json::to_string(&Topic::VolatilityEstimate).unwrap();
        assert_eq!(json, "\"volatility_estimate\"");
        assert_eq!(Topic::AiInsight.to_string(), "ai_insight");
    }
}
