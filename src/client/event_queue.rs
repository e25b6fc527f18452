//! Bounded event queue between the client's listener thread and the
//! application thread.
//!
//! A fixed-capacity FIFO guarded by one mutex with a "not empty" condition
//! variable. Producers never block: a full queue rejects the push. Consumers
//! block in [`EventQueue::pop`] until an event arrives or the queue is closed.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::transport::message::MsgType;
use crate::utils::lock;

pub const EVENT_QUEUE_CAPACITY: usize = 128;

/// Longest topic stored in an [`Event`], in bytes.
pub const MAX_EVENT_TOPIC_LEN: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("event queue is full")]
    Full,
    #[error("event queue is closed")]
    Closed,
}

/// Something the listener received on behalf of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub msg_type: MsgType,
    pub msg_id: u32,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Receive time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Event {
    /// Build an event stamped with the current time. Topics longer than
    /// [`MAX_EVENT_TOPIC_LEN`] are cut at the nearest char boundary below it.
    pub fn new(msg_type: MsgType, msg_id: u32, topic: &str, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            msg_id,
            topic: bounded_topic(topic).to_string(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn ack(msg_id: u32) -> Self {
        Self::new(MsgType::Ack, msg_id, "", Vec::new())
    }

    pub fn is_ack_for(&self, msg_id: u32) -> bool {
        self.msg_type == MsgType::Ack && self.msg_id == msg_id
    }
}

fn bounded_topic(topic: &str) -> &str {
    if topic.len() <= MAX_EVENT_TOPIC_LEN {
        return topic;
    }
    let mut end = MAX_EVENT_TOPIC_LEN;
    while !topic.is_char_boundary(end) {
        end -= 1;
    }
    &topic[..end]
}

#[derive(Debug)]
struct Ring {
    events: VecDeque<Event>,
    closed: bool,
}

#[derive(Debug)]
pub struct EventQueue {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    capacity: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Append `event`, failing immediately if the queue is full or closed.
    /// The topic is cut to [`MAX_EVENT_TOPIC_LEN`] however the event was built.
    pub fn push(&self, mut event: Event) -> Result<(), QueueError> {
        let bounded = bounded_topic(&event.topic).len();
        event.topic.truncate(bounded);

        let mut ring = lock(&self.ring);
        if ring.closed {
            return Err(QueueError::Closed);
        }
        if ring.events.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        ring.events.push_back(event);
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an event is available and take it from the head.
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed and drained.
    pub fn pop(&self) -> Result<Event, QueueError> {
        let mut ring = lock(&self.ring);
        loop {
            if let Some(event) = ring.events.pop_front() {
                return Ok(event);
            }
            if ring.closed {
                return Err(QueueError::Closed);
            }
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Event>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut ring = lock(&self.ring);
        loop {
            if let Some(event) = ring.events.pop_front() {
                return Ok(Some(event));
            }
            if ring.closed {
                return Err(QueueError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            ring = self
                .not_empty
                .wait_timeout(ring, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Remove and return the first event satisfying `predicate`, keeping the
    /// order of the rest. Never blocks.
    pub fn remove_matching<F>(&self, mut predicate: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut ring = lock(&self.ring);
        let index = ring.events.iter().position(|event| predicate(event))?;
        ring.events.remove(index)
    }

    /// Remove every event satisfying `predicate`, returning how many were
    /// dropped. Never blocks.
    pub fn remove_all<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&Event) -> bool,
    {
        let mut ring = lock(&self.ring);
        let before = ring.events.len();
        ring.events.retain(|event| !predicate(event));
        before - ring.events.len()
    }

    /// Reject further pushes and wake every blocked consumer. Events already
    /// queued can still be popped.
    pub fn close(&self) {
        lock(&self.ring).closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.ring).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.ring).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
