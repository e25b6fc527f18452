//! The `client` module is the publishing/subscribing side of the bus.
//!
//! It provides the `Client` with its QoS retry state machine, the bounded
//! `EventQueue` the listener thread fills, and the `Qos2Tracker` that records
//! QoS2 handshake progress per message id.

pub mod event_queue;
pub mod pubsub_client;
pub mod qos2;

pub use event_queue::{EVENT_QUEUE_CAPACITY, Event, EventQueue, QueueError};
pub use pubsub_client::{Client, ClientError, RetryPolicy, Stage};
pub use qos2::Qos2Tracker;

#[cfg(test)]
mod tests;
