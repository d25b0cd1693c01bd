//! Snapshot Tiering
//!
//! Turns the producer's per-tick [`DashboardSnapshot`] into the
//! `portfolio_analytics` payload worth sending, if any: the complete snapshot,
//! an incremental delta of the analytics fields that moved, or nothing.

use std::time::Instant;

use crate::config::SignificanceConfig;
use crate::dispatch::CrossContextDispatcher;
use crate::events::{
    AnalyticsFields, AnalyticsPayload, DashboardSnapshot, FieldDelta, FullAnalytics,
    IncrementalAnalytics,
};
use crate::significance::{
    ChangeRecord, ChangeSignificanceEvaluator, SignificancePolicy, UpdateTier,
};

/// Producer-side state for `portfolio_analytics`
#[derive(Debug, Clone)]
pub struct PortfolioTiering {
    evaluator: ChangeSignificanceEvaluator,
    /// Latest news/insight items included in a full snapshot
    feed_slice: usize,
    last_fields: Option<AnalyticsFields>,
}

impl PortfolioTiering {
    pub fn new(policy: SignificancePolicy, feed_slice: usize) -> Self {
        Self {
            evaluator: ChangeSignificanceEvaluator::new(policy),
            feed_slice,
            last_fields: None,
        }
    }

    pub fn from_config(config: &SignificanceConfig) -> Self {
        Self::new(SignificancePolicy::from(config), config.feed_slice)
    }

    /// Payload to broadcast for this tick, or `None` when nothing changed enough
    pub fn next_payload(
        &mut self,
        snapshot: &DashboardSnapshot,
        now: Instant,
    ) -> Option<AnalyticsPayload> {
        let fields = snapshot.fields();
        let record = ChangeRecord::new(fields.total_value, fields.pnl);

        let payload = match (self.evaluator.observe(record, now), self.last_fields) {
            (UpdateTier::Skip, _) => return None,
            (UpdateTier::Incremental, Some(previous)) => {
                AnalyticsPayload::Incremental(IncrementalAnalytics {
                    portfolio_id: snapshot.summary.portfolio_id.clone(),
                    changes: FieldDelta::between(&previous, &fields),
                    as_of: snapshot.as_of,
                })
            }
            _ => AnalyticsPayload::Full(self.full_snapshot(snapshot)),
        };

        self.last_fields = Some(fields);
        Some(payload)
    }

    fn full_snapshot(&self, snapshot: &DashboardSnapshot) -> FullAnalytics {
        FullAnalytics {
            summary: snapshot.summary.clone(),
            risk: snapshot.risk.clone(),
            allocations: snapshot.allocations.clone(),
            news: snapshot.news.iter().take(self.feed_slice).cloned().collect(),
            insights: snapshot
                .insights
                .iter()
                .take(self.feed_slice)
                .cloned()
                .collect(),
            as_of: snapshot.as_of,
        }
    }

    /// Compute this tick's payload and hand it to the dispatcher
    pub fn publish(
        &mut self,
        snapshot: &DashboardSnapshot,
        dispatcher: &CrossContextDispatcher,
        now: Instant,
    ) -> UpdateTier {
        match self.next_payload(snapshot, now) {
            Some(payload) => {
                let tier = if payload.is_incremental() {
                    UpdateTier::Incremental
                } else {
                    UpdateTier::Full
                };
                dispatcher.broadcast_portfolio_analytics(payload);
                tier
            }
            None => UpdateTier::Skip,
        }
    }
}

impl Default for PortfolioTiering {
    fn default() -> Self {
        Self::from_config(&SignificanceConfig::default())
    }
}
