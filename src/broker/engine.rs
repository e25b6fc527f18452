//! Broker engine
//!
//! Owns the topic index and both delivery-state tables and turns each inbound
//! packet into a list of [`Outbound`] packets:
//! - SUBSCRIBE registers the sender under the topic pattern
//! - PUBLISH is fanned out to every matching subscriber, with QoS1 dedup and
//!   the QoS2 handshake applied per `(peer, msg_id)`
//! - CONTROL(RELEASE) completes a QoS2 handshake
//!
//! Concurrency and usage notes:
//! - The API is synchronous and designed to be held behind a lock
//!   (`Arc<Mutex<Broker>>`) by the transport layer. Dispatch performs no I/O,
//!   so the lock is never held across a network call.
//! - Table maintenance runs as a background task (`start_sweep_loop`) that
//!   reclaims handshake and dedup entries older than the configured TTL.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::broker::message::Outbound;
use crate::broker::topic::{Subscriber, TopicIndex};
use crate::delivery::{DedupTable, PeerMessage, PendingTable, Qos2State};
use crate::transport::codec::{self, CodecError};
use crate::transport::message::{ControlMessage, ControlType, Envelope, Header, MsgType, QosLevel};
use crate::utils::lock;

pub type SharedBroker = Arc<Mutex<Broker>>;

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: TopicIndex,
    pub pending: PendingTable,
    pub dedup: DedupTable,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    /// Decode and dispatch one packet from `peer`. Undecodable packets are
    /// dropped.
    pub fn handle_datagram(&mut self, peer: SocketAddr, bytes: &[u8]) -> Vec<Outbound> {
        match codec::decode(bytes) {
            Ok(envelope) => self.handle_envelope(peer, envelope),
            Err(e) => {
                debug!(%peer, len = bytes.len(), "Dropping malformed packet: {e}");
                Vec::new()
            }
        }
    }

    pub fn handle_envelope(&mut self, peer: SocketAddr, envelope: Envelope) -> Vec<Outbound> {
        match envelope.header.msg_type {
            MsgType::Subscribe => {
                self.subscribe(envelope.topic(), peer);
                Vec::new()
            }
            MsgType::Publish => self.publish(peer, &envelope),
            MsgType::Control => match ControlMessage::try_from(envelope) {
                Ok(control) => self.handle_control(peer, &control),
                Err(e) => {
                    warn!(%peer, "Dropping malformed CONTROL message: {e}");
                    Vec::new()
                }
            },
            MsgType::Ack | MsgType::NodeCountUpdate => {
                debug!(
                    %peer,
                    msg_type = ?envelope.header.msg_type,
                    "Ignoring message type not handled by the broker"
                );
                Vec::new()
            }
        }
    }

    pub fn subscribe(&mut self, pattern: &str, subscriber: Subscriber) {
        if self.topics.subscribe(pattern, subscriber) {
            info!("{subscriber} subscribed to {pattern}");
        } else {
            debug!("{subscriber} already subscribed to {pattern}");
        }
    }

    fn publish(&mut self, peer: SocketAddr, envelope: &Envelope) -> Vec<Outbound> {
        let msg_id = envelope.header.msg_id;
        let key = PeerMessage::new(peer, msg_id);

        match envelope.header.qos_level {
            QosLevel::AtMostOnce => self.fan_out(envelope),
            QosLevel::AtLeastOnce => {
                let mut out = if self.dedup.contains(&key) {
                    debug!(%peer, msg_id, "Duplicate QoS1 publish, acknowledging only");
                    Vec::new()
                } else {
                    self.dedup.upsert(key, ());
                    self.fan_out(envelope)
                };
                out.extend(reply(peer, codec::encode(&Header::ack(msg_id), None, &[])));
                out
            }
            QosLevel::ExactlyOnce => {
                let mut out = match self.pending.get(&key) {
                    None => {
                        self.pending.upsert(key, Qos2State::Received);
                        self.fan_out(envelope)
                    }
                    Some(state) => {
                        debug!(%peer, msg_id, ?state, "Replayed QoS2 publish, not forwarding");
                        Vec::new()
                    }
                };
                out.extend(control_reply(peer, msg_id, ControlType::Received));
                out
            }
        }
    }

    fn handle_control(&mut self, peer: SocketAddr, control: &ControlMessage) -> Vec<Outbound> {
        let msg_id = control.header.msg_id;
        let key = PeerMessage::new(peer, msg_id);

        match control.ctrl_type {
            ControlType::Release => match self.pending.get(&key) {
                None => {
                    warn!(%peer, msg_id, "RELEASE for unknown message, ignoring");
                    Vec::new()
                }
                Some(Qos2State::Completed) => {
                    debug!(%peer, msg_id, "Repeated RELEASE, re-sending COMPLETE");
                    control_reply(peer, msg_id, ControlType::Complete)
                        .into_iter()
                        .collect()
                }
                Some(_) => {
                    self.pending.advance(&key, Qos2State::Released);
                    let out = control_reply(peer, msg_id, ControlType::Complete);
                    self.pending.advance(&key, Qos2State::Completed);
                    debug!(%peer, msg_id, "QoS2 handshake completed");
                    out.into_iter().collect()
                }
            },
            ControlType::Received | ControlType::Complete => {
                warn!(
                    %peer,
                    msg_id,
                    ctrl_type = ?control.ctrl_type,
                    "Unexpected CONTROL message at broker, ignoring"
                );
                Vec::new()
            }
        }
    }

    /// Forward `envelope` unchanged to every matching subscriber.
    fn fan_out(&self, envelope: &Envelope) -> Vec<Outbound> {
        let topic = envelope.topic();
        let targets = self.topics.matches(topic);
        if targets.is_empty() {
            debug!("No subscribers for '{topic}'");
            return Vec::new();
        }

        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to re-encode publish for '{topic}': {e}");
                return Vec::new();
            }
        };

        debug!("PUBLISH '{topic}' to {} subscribers", targets.len());
        targets
            .into_iter()
            .map(|subscriber| Outbound::new(subscriber, bytes.clone()))
            .collect()
    }

    /// Drop handshake and dedup entries older than `ttl`.
    pub fn sweep_expired(&mut self, ttl: Duration) -> usize {
        self.pending.sweep(ttl) + self.dedup.sweep(ttl)
    }

    /// Periodically sweep expired delivery state until the task is dropped.
    pub async fn start_sweep_loop(broker: SharedBroker, interval: Duration, ttl: Duration) {
        loop {
            tokio::time::sleep(interval).await;

            let removed = lock(&broker).sweep_expired(ttl);
            if removed > 0 {
                debug!("Swept {removed} expired delivery entries");
            }
        }
    }
}

fn reply(to: SocketAddr, encoded: Result<Vec<u8>, CodecError>) -> Option<Outbound> {
    match encoded {
        Ok(bytes) => Some(Outbound::new(to, bytes)),
        Err(e) => {
            error!(%to, "Failed to encode reply: {e}");
            None
        }
    }
}

fn control_reply(to: SocketAddr, msg_id: u32, ctrl_type: ControlType) -> Option<Outbound> {
    reply(to, codec::encode_control(&Header::control(msg_id), ctrl_type, &[]))
}
