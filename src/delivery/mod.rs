//! Delivery state tables
//!
//! Keyed state with a last-touched timestamp, used for:
//! - the broker's QoS2 handshake table, keyed by `(peer, msg_id)`
//! - the broker's QoS1 dedup table, keyed by `(peer, msg_id)`
//! - the client's QoS2 table, keyed by `msg_id` (see `client::qos2`)
//!
//! Entries are never expired implicitly; `sweep` is an explicit maintenance
//! operation run by the owner.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identifies one message from one publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerMessage {
    pub peer: SocketAddr,
    pub msg_id: u32,
}

impl PeerMessage {
    pub fn new(peer: SocketAddr, msg_id: u32) -> Self {
        Self { peer, msg_id }
    }
}

/// Broker-side QoS2 handshake progress. Ordered: transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Qos2State {
    Received,
    Released,
    Completed,
}

/// Client-side QoS2 handshake progress. Ordered: transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientQos2State {
    #[default]
    None,
    WaitReceived,
    WaitComplete,
    Completed,
}

#[derive(Debug, Clone)]
struct Entry<S> {
    state: S,
    touched: Instant,
}

#[derive(Debug, Clone)]
pub struct DeliveryTable<K, S> {
    entries: HashMap<K, Entry<S>>,
}

impl<K, S> Default for DeliveryTable<K, S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, S> DeliveryTable<K, S>
where
    K: Eq + Hash,
    S: Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the state for `key`, refreshing its timestamp.
    pub fn upsert(&mut self, key: K, state: S) {
        self.upsert_at(key, state, Instant::now());
    }

    pub fn upsert_at(&mut self, key: K, state: S, now: Instant) {
        self.entries.insert(key, Entry { state, touched: now });
    }

    pub fn get(&self, key: &K) -> Option<S> {
        self.entries.get(key).map(|entry| entry.state)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<S> {
        self.entries.remove(key).map(|entry| entry.state)
    }

    /// Remove every entry last touched more than `ttl` ago.
    pub fn sweep(&mut self, ttl: Duration) -> usize {
        self.sweep_at(Instant::now(), ttl)
    }

    pub fn sweep_at(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.touched) <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, S> DeliveryTable<K, S>
where
    K: Eq + Hash,
    S: Copy + Ord,
{
    /// Move `key` to `next` only if that is a forward step. Returns the
    /// previous state, or `None` when the key is unknown. A backward or
    /// repeated step leaves the entry untouched.
    pub fn advance(&mut self, key: &K, next: S) -> Option<S> {
        let entry = self.entries.get_mut(key)?;
        let previous = entry.state;
        if next > previous {
            entry.state = next;
            entry.touched = Instant::now();
        }
        Some(previous)
    }
}

/// `(peer, msg_id)` → QoS2 handshake state.
pub type PendingTable = DeliveryTable<PeerMessage, Qos2State>;

/// `(peer, msg_id)` → seen marker for QoS1 duplicate suppression.
pub type DedupTable = DeliveryTable<PeerMessage, ()>;

#[cfg(test)]
mod tests;
