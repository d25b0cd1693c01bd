//! Change Significance
//!
//! Decides, per producer tick, whether the dashboard gets a full snapshot, an
//! incremental update, or nothing:
//!
//! - **Full** when no full snapshot was sent yet or the last one is at least
//!   `full_refresh_interval` old, whatever the magnitude of change.
//! - **Incremental** when the portfolio value moved by more than
//!   `value_change_pct` percent, or P&L by more than `pnl_change_abs`.
//! - **Skip** otherwise.

use std::time::{Duration, Instant};

use crate::config::SignificanceConfig;

/// Thresholds for the tiering decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificancePolicy {
    /// Maximum age of the last full snapshot
    pub full_refresh_interval: Duration,
    /// Relative value change, in percent, above which an update is sent
    pub value_change_pct: f64,
    /// Absolute P&L change above which an update is sent
    pub pnl_change_abs: f64,
}

impl Default for SignificancePolicy {
    fn default() -> Self {
        Self {
            full_refresh_interval: Duration::from_secs(60),
            value_change_pct: 0.5,
            pnl_change_abs: 1000.0,
        }
    }
}

impl From<&SignificanceConfig> for SignificancePolicy {
    fn from(config: &SignificanceConfig) -> Self {
        Self {
            full_refresh_interval: Duration::from_secs(config.full_refresh_secs),
            value_change_pct: config.value_change_pct,
            pnl_change_abs: config.pnl_change_abs,
        }
    }
}

/// Portfolio value and P&L as last broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeRecord {
    pub portfolio_value: f64,
    pub pnl: f64,
}

impl ChangeRecord {
    pub fn new(portfolio_value: f64, pnl: f64) -> Self {
        Self { portfolio_value, pnl }
    }
}

/// What to send this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTier {
    Full,
    Incremental,
    Skip,
}

#[derive(Debug, Clone)]
pub struct ChangeSignificanceEvaluator {
    policy: SignificancePolicy,
    last: Option<ChangeRecord>,
    last_full: Option<Instant>,
}

impl ChangeSignificanceEvaluator {
    pub fn new(policy: SignificancePolicy) -> Self {
        Self {
            policy,
            last: None,
            last_full: None,
        }
    }

    pub fn policy(&self) -> &SignificancePolicy {
        &self.policy
    }

    pub fn last_record(&self) -> Option<ChangeRecord> {
        self.last
    }

    /// Classify `current` against the last broadcast values
    pub fn evaluate(&self, current: &ChangeRecord, now: Instant) -> UpdateTier {
        let full_due = match self.last_full {
            Some(at) => now.saturating_duration_since(at) >= self.policy.full_refresh_interval,
            None => true,
        };
        if full_due {
            return UpdateTier::Full;
        }

        let last = match self.last {
            Some(last) => last,
            None => return UpdateTier::Full,
        };

        if self.value_change_significant(last.portfolio_value, current.portfolio_value)
            || (current.pnl - last.pnl).abs() > self.policy.pnl_change_abs
        {
            UpdateTier::Incremental
        } else {
            UpdateTier::Skip
        }
    }

    fn value_change_significant(&self, last: f64, current: f64) -> bool {
        let delta = (current - last).abs();
        if last == 0.0 {
            return delta > 0.0;
        }
        delta / last.abs() * 100.0 > self.policy.value_change_pct
    }

    /// Remember what was broadcast; `Skip` leaves the record untouched
    pub fn record(&mut self, tier: UpdateTier, current: ChangeRecord, now: Instant) {
        match tier {
            UpdateTier::Full => {
                self.last = Some(current);
                self.last_full = Some(now);
            }
            UpdateTier::Incremental => self.last = Some(current),
            UpdateTier::Skip => {}
        }
    }

    /// Evaluate and record in one step
    pub fn observe(&mut self, current: ChangeRecord, now: Instant) -> UpdateTier {
        let tier = self.evaluate(&current, now);
        self.record(tier, current, now);
        tier
    }
}

impl Default for ChangeSignificanceEvaluator {
    fn default() -> Self {
        Self::new(SignificancePolicy::default())
    }
}
