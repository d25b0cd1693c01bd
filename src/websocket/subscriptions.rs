//! Subscription Manager
//!
//! Per-connection topic sets. Requests are filtered against the known topics
//! and applied as set union / difference, so repeating a request is a no-op.

use std::collections::{BTreeSet, HashMap};

use super::registry::ConnectionId;
use super::topics::Topic;

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: HashMap<ConnectionId, BTreeSet<Topic>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connection with an empty set
    pub fn track(&mut self, id: &str) {
        self.subscriptions.entry(id.to_string()).or_default();
    }

    pub fn forget(&mut self, id: &str) -> Option<BTreeSet<Topic>> {
        self.subscriptions.remove(id)
    }

    /// Add the known topics in `requested`; returns the resulting set
    ///
    /// `None` if the connection is not tracked.
    pub fn subscribe<S: AsRef<str>>(&mut self, id: &str, requested: &[S]) -> Option<Vec<Topic>> {
        let topics = self.subscriptions.get_mut(id)?;
        topics.extend(Topic::filter_known(requested));
        Some(topics.iter().copied().collect())
    }

    /// Remove the known topics in `requested`
    ///
    /// Returns the recognised topics of the request and the remaining set.
    pub fn unsubscribe<S: AsRef<str>>(
        &mut self,
        id: &str,
        requested: &[S],
    ) -> Option<(Vec<Topic>, Vec<Topic>)> {
        let topics = self.subscriptions.get_mut(id)?;
        let removed: BTreeSet<Topic> = Topic::filter_known(requested).into_iter().collect();
        for topic in &removed {
            topics.remove(topic);
        }
        Some((
            removed.into_iter().collect(),
            topics.iter().copied().collect(),
        ))
    }

    pub fn topics(&self, id: &str) -> Option<&BTreeSet<Topic>> {
        self.subscriptions.get(id)
    }

    /// Whether a broadcast on `topic` should reach `id`
    ///
    /// An empty set receives everything.
    pub fn wants(&self, id: &str, topic: Topic) -> bool {
        match self.subscriptions.get(id) {
            Some(topics) => {
                topics.is_empty() || topics.contains(&topic) || topics.contains(&Topic::All)
            }
            None => false,
        }
    }

    /// Connections that explicitly subscribed to `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions
            .values()
            .filter(|topics| topics.contains(&topic))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(id: &str) -> SubscriptionManager {
        let mut manager = SubscriptionManager::new();
        manager.track(id);
        manager
    }

    #[test]
    fn test_subscribe_filters_unknown() {
        let mut manager = manager_with("a");
        let result = manager
            .subscribe("a", &["threshold_breach", "not_a_topic"])
            .unwrap();
        assert_eq!(result, vec![Topic::ThresholdBreach]);
    }

    #[test]
    fn test_subscribe_returns_union() {
        let mut manager = manager_with("a");
        manager.subscribe("a", &["risk_alert"]).unwrap();
        let result = manager.subscribe("a", &["news_update"]).unwrap();
        assert_eq!(result, vec![Topic::NewsUpdate, Topic::RiskAlert]);
    }

    #[test]
    fn test_operations_are_idempotent() {
        let mut manager = manager_with("a");
        let first = manager.subscribe("a", &["ai_insight", "ai_insight"]).unwrap();
        let second = manager.subscribe("a", &["ai_insight"]).unwrap();
        assert_eq!(first, second);

        let (removed, remaining) = manager.unsubscribe("a", &["ai_insight"]).unwrap();
        assert_eq!(removed, vec![Topic::AiInsight]);
        assert!(remaining.is_empty());
        let (_, remaining) = manager.unsubscribe("a", &["ai_insight"]).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_sequence_matches_set_algebra() {
        let mut manager = manager_with("a");
        let mut expected: BTreeSet<Topic> = BTreeSet::new();

        let ops: Vec<(bool, Vec<&str>)> = vec![
            (true, vec!["all_trades", "bogus", "risk_alert"]),
            (false, vec!["risk_alert", "position_update"]),
            (true, vec!["all_trades", "all"]),
            (false, vec!["bogus"]),
            (true, vec!["position_update"]),
            (false, vec!["all"]),
        ];

        for (is_subscribe, topics) in ops {
            let known = Topic::filter_known(&topics);
            let confirmed = if is_subscribe {
                expected.extend(known);
                manager.subscribe("a", &topics).unwrap()
            } else {
                for topic in &known {
                    expected.remove(topic);
                }
                manager.unsubscribe("a", &topics).unwrap().1
            };
            assert_eq!(confirmed, expected.iter().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_wants() {
        let mut manager = manager_with("open");
        manager.track("narrow");
        manager.track("wild");
        manager.subscribe("narrow", &["threshold_breach"]).unwrap();
        manager.subscribe("wild", &["all"]).unwrap();

        assert!(manager.wants("open", Topic::NewsUpdate));
        assert!(manager.wants("narrow", Topic::ThresholdBreach));
        assert!(!manager.wants("narrow", Topic::NewsUpdate));
        assert!(manager.wants("wild", Topic::NewsUpdate));
        assert!(!manager.wants("missing", Topic::NewsUpdate));

        assert_eq!(manager.subscriber_count(Topic::ThresholdBreach), 1);
        assert_eq!(manager.subscriber_count(Topic::NewsUpdate), 0);
    }

    #[test]
    fn test_untracked_connection() {
        let mut manager = SubscriptionManager::new();
        assert!(manager.subscribe("ghost", &["all"]).is_none());
        assert!(manager.unsubscribe("ghost", &["all"]).is_none());
    }
}
