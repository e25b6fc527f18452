//! Wire-level message types
//!
//! Every datagram (or stream frame) starts with a fixed 15-byte [`Header`].
//! All multi-byte fields are big-endian on the wire.
//!
//! ```text
//! | version | msg_type | qos | topic_id | msg_id | frag_id | frag_total | batch | payload_len | nodes |
//! |   1B    |    1B    | 1B  |    2B    |   4B   |   1B    |     1B     |  1B   |     2B      |  1B   |
//! ```
//!
//! `payload_length` always counts the bytes that follow the header.

use crate::transport::codec::CodecError;

/// Protocol version written into every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the encoded header in bytes.
pub const HEADER_LEN: usize = 15;

/// Maximum topic length carried by an envelope (1-byte length prefix).
pub const MAX_TOPIC_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Publish = 0,
    Ack = 1,
    NodeCountUpdate = 2,
    Control = 3,
    Subscribe = 4,
}

impl MsgType {
    /// Whether the body of this message type starts with a length-prefixed topic.
    pub fn carries_topic(self) -> bool {
        matches!(self, MsgType::Publish | MsgType::Subscribe)
    }
}

impl TryFrom<u8> for MsgType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MsgType::Publish),
            1 => Ok(MsgType::Ack),
            2 => Ok(MsgType::NodeCountUpdate),
            3 => Ok(MsgType::Control),
            4 => Ok(MsgType::Subscribe),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Delivery guarantee tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum QosLevel {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QosLevel {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(CodecError::InvalidQos(other)),
        }
    }
}

impl std::fmt::Display for QosLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QoS{}", *self as u8)
    }
}

/// QoS2 handshake step carried in the first body byte of a CONTROL message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlType {
    Received = 0x01,
    Release = 0x02,
    Complete = 0x03,
}

impl TryFrom<u8> for ControlType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ControlType::Received),
            0x02 => Ok(ControlType::Release),
            0x03 => Ok(ControlType::Complete),
            other => Err(CodecError::InvalidControlType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: MsgType,
    pub qos_level: QosLevel,
    /// Legacy field, carried but never interpreted.
    pub topic_id: u16,
    pub msg_id: u32,
    pub frag_id: u8,
    pub frag_total: u8,
    pub batch_size: u8,
    /// Recomputed by the encoder; validated by the decoder.
    pub payload_length: u16,
    pub client_node_count: u8,
}

impl Header {
    /// Single-fragment header with the defaults every client writes.
    pub fn new(msg_type: MsgType, qos_level: QosLevel, msg_id: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            qos_level,
            topic_id: 0,
            msg_id,
            frag_id: 0,
            frag_total: 1,
            batch_size: 1,
            payload_length: 0,
            client_node_count: 1,
        }
    }

    pub fn publish(qos_level: QosLevel, msg_id: u32) -> Self {
        Self::new(MsgType::Publish, qos_level, msg_id)
    }

    pub fn subscribe(msg_id: u32) -> Self {
        Self::new(MsgType::Subscribe, QosLevel::AtMostOnce, msg_id)
    }

    pub fn ack(msg_id: u32) -> Self {
        Self::new(MsgType::Ack, QosLevel::AtLeastOnce, msg_id)
    }

    pub fn control(msg_id: u32) -> Self {
        Self::new(MsgType::Control, QosLevel::ExactlyOnce, msg_id)
    }
}

/// A decoded message: header plus topic (PUBLISH/SUBSCRIBE only) and body bytes.
///
/// For ACK, CONTROL and NODE_COUNT_UPDATE the `payload` holds the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub topic: Option<String>,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or_default()
    }
}

/// A decoded CONTROL message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub header: Header,
    pub ctrl_type: ControlType,
    pub data: Vec<u8>,
}
