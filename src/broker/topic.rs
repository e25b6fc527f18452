//! Topic index
//!
//! A trie over `/`-separated topic segments. Subscription patterns are stored
//! verbatim, wildcards included; `+` and `#` only get their special meaning
//! during matching:
//! - `+` matches exactly one segment
//! - `#` matches the remainder of the topic from its position
//!
//! Membership is monotonic: there is no unsubscribe. Callers synchronize
//! access (the broker lock).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

pub type Subscriber = SocketAddr;

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

#[derive(Debug, Default)]
struct TopicNode {
    segment: String,
    children: HashMap<String, TopicNode>,
    subscribers: HashSet<Subscriber>,
}

impl TopicNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Self::default()
        }
    }

    fn collect_into(&self, segments: &[&str], level: usize, result: &mut HashSet<Subscriber>) {
        let is_multi_level = self.segment == MULTI_LEVEL;
        if level == segments.len() || is_multi_level {
            result.extend(self.subscribers.iter().copied());
        }
        if level >= segments.len() || is_multi_level {
            return;
        }

        let segment = segments[level];
        for child in self.children.values() {
            if child.segment == segment
                || child.segment == SINGLE_LEVEL
                || child.segment == MULTI_LEVEL
            {
                child.collect_into(segments, level + 1, result);
            }
        }
    }

    fn count_subscriptions(&self) -> usize {
        self.subscribers.len()
            + self
                .children
                .values()
                .map(TopicNode::count_subscriptions)
                .sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct TopicIndex {
    root: TopicNode,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` under `pattern`. Returns `false` if it was
    /// already registered for exactly this pattern.
    pub fn subscribe(&mut self, pattern: &str, subscriber: Subscriber) -> bool {
        let mut node = &mut self.root;
        for segment in split(pattern) {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TopicNode::new(segment));
        }
        node.subscribers.insert(subscriber)
    }

    /// Every subscriber whose pattern matches `topic`, each listed once.
    pub fn matches(&self, topic: &str) -> HashSet<Subscriber> {
        let segments: Vec<&str> = split(topic).collect();
        let mut result = HashSet::new();
        self.root.collect_into(&segments, 0, &mut result);
        result
    }

    /// Number of (pattern, subscriber) registrations.
    pub fn subscription_count(&self) -> usize {
        self.root.count_subscriptions()
    }

    pub fn is_empty(&self) -> bool {
        self.subscription_count() == 0
    }
}

// Empty segments are kept: "a//b" has three levels.
fn split(topic: &str) -> impl Iterator<Item = &str> {
    topic.split('/')
}
