//! Datagram client with QoS-aware publish.
//!
//! A `Client` owns a background listener thread that turns incoming packets
//! into [`Event`]s (PUBLISH, ACK) or QoS2 tracker updates (CONTROL). The
//! application thread publishes and then polls the queue or the tracker until
//! the broker's reply shows up, retransmitting on timeout.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::event_queue::{Event, EventQueue, QueueError};
use crate::client::qos2::Qos2Tracker;
use crate::delivery::ClientQos2State;
use crate::transport::codec::{self, CodecError, MAX_BODY_LEN};
use crate::transport::message::{ControlMessage, ControlType, Envelope, HEADER_LEN, Header, MsgType, QosLevel};
use crate::transport::{DatagramTransport, is_timeout};
use crate::utils::lock;

/// Read timeout of the listener socket; bounds how long `close` waits.
pub const LISTENER_TICK: Duration = Duration::from_millis(100);

const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MAX_BODY_LEN;

/// How long to wait for each reply and how often to resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait per attempt before retransmitting.
    pub timeout: Duration,
    /// Retransmissions after the first send.
    pub max_retries: u32,
    /// Sleep between checks while waiting.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_retries: 5,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// The reply a publish was waiting for when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ack,
    Received,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ack => write!(f, "ACK"),
            Stage::Received => write!(f, "RECEIVED"),
            Stage::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("message {msg_id}: no {stage} after {attempts} attempts")]
    RetriesExhausted {
        msg_id: u32,
        stage: Stage,
        attempts: u32,
    },
    #[error("client is closed")]
    Closed,
}

/// State shared with the listener thread.
struct Shared<T> {
    transport: T,
    broker: SocketAddr,
    events: EventQueue,
    qos2: Qos2Tracker,
    /// QoS1 message ids with a publish still waiting for its ACK.
    awaiting_ack: Mutex<HashSet<u32>>,
    shutdown: AtomicBool,
}

impl<T: DatagramTransport> Shared<T> {
    fn listen(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        while !self.shutdown.load(Ordering::Acquire) {
            match self.transport.recv_from(&mut buf) {
                Ok((len, _source)) => self.dispatch(&buf[..len]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    warn!("Receive failed: {e}");
                    thread::sleep(LISTENER_TICK);
                }
            }
        }
        debug!("Listener stopped");
    }

    fn dispatch(&self, bytes: &[u8]) {
        let envelope = match codec::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(len = bytes.len(), "Dropping undecodable packet: {e}");
                return;
            }
        };

        match envelope.header.msg_type {
            MsgType::Ack => self.on_ack(envelope.header.msg_id),
            MsgType::Publish => {
                let Envelope {
                    header,
                    topic,
                    payload,
                } = envelope;
                let topic = topic.unwrap_or_default();
                self.enqueue(Event::new(MsgType::Publish, header.msg_id, &topic, payload));
            }
            MsgType::Control => match ControlMessage::try_from(envelope) {
                Ok(control) => self.on_control(&control),
                Err(e) => debug!("Dropping malformed CONTROL message: {e}"),
            },
            other => debug!(msg_type = ?other, "Ignoring message type"),
        }
    }

    fn on_control(&self, control: &ControlMessage) {
        let msg_id = control.header.msg_id;
        let next = match control.ctrl_type {
            ControlType::Received => ClientQos2State::WaitComplete,
            ControlType::Complete => ClientQos2State::Completed,
            ControlType::Release => {
                debug!(msg_id, "Ignoring RELEASE sent to a client");
                return;
            }
        };

        if self.qos2.advance(msg_id, next) {
            debug!(msg_id, state = ?next, "QoS2 state advanced");
        }
    }

    /// Queue an ACK only while a publish is waiting for it. Duplicates that
    /// arrive after the wait ended are dropped here.
    fn on_ack(&self, msg_id: u32) {
        let awaiting = lock(&self.awaiting_ack);
        if !awaiting.contains(&msg_id) {
            debug!(msg_id, "Dropping ACK for a message not awaiting one");
            return;
        }
        self.enqueue(Event::ack(msg_id));
    }

    fn begin_ack_wait(&self, msg_id: u32) {
        lock(&self.awaiting_ack).insert(msg_id);
    }

    /// Stop waiting for `msg_id` and discard every ACK already queued for it.
    fn end_ack_wait(&self, msg_id: u32) {
        let mut awaiting = lock(&self.awaiting_ack);
        awaiting.remove(&msg_id);
        let discarded = self.events.remove_all(|event| event.is_ack_for(msg_id));
        if discarded > 0 {
            debug!(msg_id, discarded, "Discarded duplicate ACKs");
        }
    }

    fn enqueue(&self, event: Event) {
        let msg_id = event.msg_id;
        if let Err(e) = self.events.push(event) {
            warn!(msg_id, "Dropping incoming message: {e}");
        }
    }
}

pub struct Client<T: DatagramTransport = UdpSocket> {
    shared: Arc<Shared<T>>,
    listener: Option<JoinHandle<()>>,
    next_msg_id: AtomicU32,
    qos: QosLevel,
    retry: RetryPolicy,
}

impl Client {
    /// Bind an ephemeral UDP socket and start listening for the broker.
    pub fn connect(broker: SocketAddr) -> Result<Self, ClientError> {
        let local = match broker {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(LISTENER_TICK))?;
        Self::with_transport(socket, broker)
    }
}

impl<T: DatagramTransport> Client<T> {
    /// Start a client over `transport`. The transport should time out its
    /// receives so the listener can notice shutdown.
    pub fn with_transport(transport: T, broker: SocketAddr) -> Result<Self, ClientError> {
        let shared = Arc::new(Shared {
            transport,
            broker,
            events: EventQueue::new(),
            qos2: Qos2Tracker::new(),
            awaiting_ack: Mutex::default(),
            shutdown: AtomicBool::new(false),
        });

        let listener_state = shared.clone();
        let listener = thread::Builder::new()
            .name("slimmq-listener".into())
            .spawn(move || listener_state.listen())?;

        info!("Client started for broker {broker}");
        Ok(Self {
            shared,
            listener: Some(listener),
            next_msg_id: AtomicU32::new(1),
            qos: QosLevel::default(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn qos(&self) -> QosLevel {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QosLevel) {
        self.qos = qos;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn broker(&self) -> SocketAddr {
        self.shared.broker
    }

    /// Register interest in `topic`. The broker does not reply.
    pub fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        let packet = codec::encode(&Header::subscribe(self.next_id()), Some(topic), &[])?;
        self.send(&packet)?;
        info!("Subscribed to {topic}");
        Ok(())
    }

    /// Publish with the client's configured QoS.
    pub fn publish(&self, topic: &str, data: &[u8]) -> Result<(), ClientError> {
        self.publish_with_qos(topic, data, self.qos)
    }

    /// Publish and block until the broker confirms delivery at `qos`.
    pub fn publish_with_qos(&self, topic: &str, data: &[u8], qos: QosLevel) -> Result<(), ClientError> {
        self.ensure_open()?;
        let msg_id = self.next_id();
        let packet = codec::encode(&Header::publish(qos, msg_id), Some(topic), data)?;

        match qos {
            QosLevel::AtMostOnce => self.send(&packet),
            QosLevel::AtLeastOnce => {
                self.shared.begin_ack_wait(msg_id);
                let result = self.retry_until(msg_id, Stage::Ack, &packet, || {
                    self.shared
                        .events
                        .remove_matching(|event| event.is_ack_for(msg_id))
                        .is_some()
                });
                self.shared.end_ack_wait(msg_id);
                result
            }
            QosLevel::ExactlyOnce => {
                self.shared.qos2.begin(msg_id);
                let result = self.exactly_once(msg_id, &packet);
                self.shared.qos2.remove(msg_id);
                result
            }
        }
    }

    fn exactly_once(&self, msg_id: u32, packet: &[u8]) -> Result<(), ClientError> {
        let qos2 = &self.shared.qos2;
        self.retry_until(msg_id, Stage::Received, packet, || {
            qos2.state(msg_id) >= ClientQos2State::WaitComplete
        })?;

        let release = codec::encode_control(&Header::control(msg_id), ControlType::Release, &[])?;
        self.retry_until(msg_id, Stage::Complete, &release, || {
            qos2.state(msg_id) == ClientQos2State::Completed
        })
    }

    /// Send `packet`, then poll `done` until it holds, resending each time
    /// the per-attempt timeout elapses.
    fn retry_until<F>(&self, msg_id: u32, stage: Stage, packet: &[u8], mut done: F) -> Result<(), ClientError>
    where
        F: FnMut() -> bool,
    {
        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!(msg_id, attempt, "Retransmitting, waiting for {stage}");
            }
            self.send(packet)?;

            let deadline = Instant::now() + self.retry.timeout;
            loop {
                if done() {
                    return Ok(());
                }
                self.ensure_open()?;
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(self.retry.poll_interval);
            }
        }

        warn!(msg_id, attempts, "Giving up waiting for {stage}");
        Err(ClientError::RetriesExhausted {
            msg_id,
            stage,
            attempts,
        })
    }

    /// Block until the next incoming PUBLISH. Stale ACKs are skipped.
    pub fn next_event(&self) -> Result<Event, ClientError> {
        loop {
            let event = self.shared.events.pop().map_err(|_| ClientError::Closed)?;
            if event.msg_type == MsgType::Ack {
                debug!(msg_id = event.msg_id, "Skipping stale ACK");
                continue;
            }
            return Ok(event);
        }
    }

    /// Like [`next_event`](Self::next_event) but returns `Ok(None)` after
    /// `timeout` without an event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Result<Option<Event>, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.shared.events.pop_timeout(remaining) {
                Ok(Some(event)) if event.msg_type == MsgType::Ack => {
                    debug!(msg_id = event.msg_id, "Skipping stale ACK");
                }
                Ok(event) => return Ok(event),
                Err(QueueError::Closed) | Err(QueueError::Full) => return Err(ClientError::Closed),
            }
        }
    }

    /// Number of received events not yet consumed.
    pub fn pending_events(&self) -> usize {
        self.shared.events.len()
    }

    /// Signal the listener to stop and wake any blocked `next_event` caller.
    /// Does not wait for the listener.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop the listener and wait for it to exit. Also run on drop.
    pub fn close(&mut self) {
        self.shutdown();
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                error!("Listener thread panicked");
            }
            info!("Client closed");
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn next_id(&self) -> u32 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, packet: &[u8]) -> Result<(), ClientError> {
        self.shared.transport.send_to(packet, self.shared.broker)?;
        Ok(())
    }
}

impl<T: DatagramTransport> Drop for Client<T> {
    fn drop(&mut self) {
        self.close();
    }
}
