use std::sync::Mutex;
use std::time::Duration;

use crate::delivery::{ClientQos2State, DeliveryTable};
use crate::utils::lock;

/// Per-message QoS2 progress shared by the publish loop and the listener.
///
/// The publish loop creates and clears entries; the listener only moves
/// existing entries forward.
#[derive(Debug, Default)]
pub struct Qos2Tracker {
    table: Mutex<DeliveryTable<u32, ClientQos2State>>,
}

impl Qos2Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `msg_id` in `WaitReceived`, replacing any stale entry.
    pub fn begin(&self, msg_id: u32) {
        lock(&self.table).upsert(msg_id, ClientQos2State::WaitReceived);
    }

    /// Move `msg_id` forward to `next`. Unknown ids and backward steps are
    /// ignored; returns whether the state changed.
    pub fn advance(&self, msg_id: u32, next: ClientQos2State) -> bool {
        matches!(lock(&self.table).advance(&msg_id, next), Some(previous) if previous < next)
    }

    /// Current state; untracked ids read as [`ClientQos2State::None`].
    pub fn state(&self, msg_id: u32) -> ClientQos2State {
        lock(&self.table).get(&msg_id).unwrap_or_default()
    }

    pub fn remove(&self, msg_id: u32) {
        lock(&self.table).remove(&msg_id);
    }

    pub fn sweep(&self, ttl: Duration) -> usize {
        lock(&self.table).sweep(ttl)
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
