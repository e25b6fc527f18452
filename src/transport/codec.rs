//! Binary codec for headers, envelopes and control messages
//!
//! Body layout per message type:
//! - PUBLISH / SUBSCRIBE: `topic_len:u8 | topic | payload`
//! - ACK: empty
//! - CONTROL: `ctrl_type:u8 | data`
//! - NODE_COUNT_UPDATE: raw bytes
//!
//! The encoder always recomputes `payload_length`; the decoder never trusts it
//! without checking it against the actual buffer.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::transport::message::{
    ControlMessage, ControlType, Envelope, HEADER_LEN, Header, MAX_TOPIC_LEN, MsgType, QosLevel,
};

/// Largest body the 16-bit `payload_length` field can describe.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer of {len} bytes is shorter than the 15-byte header")]
    ShortBuffer { len: usize },
    #[error("payload_length {declared} does not match the {actual} bytes after the header")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("topic length {topic_len} overruns payload_length {payload_length}")]
    TopicLengthOverrun { topic_len: usize, payload_length: usize },
    #[error("topic of {len} bytes exceeds the limit of {max}")]
    TopicTooLong { len: usize, max: usize },
    #[error("data of {len} bytes exceeds the limit of {max}")]
    DataTooLong { len: usize, max: usize },
    #[error("body of {len} bytes does not fit the 16-bit length field")]
    BodyTooLarge { len: usize },
    #[error("destination holds {capacity} bytes but {needed} are required")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("invalid QoS level {0}")]
    InvalidQos(u8),
    #[error("invalid control type {0:#04x}")]
    InvalidControlType(u8),
    #[error("expected a CONTROL message, got {0:?}")]
    NotControl(MsgType),
    #[error("control message carries no control byte")]
    MissingControlType,
    #[error("topic is not valid UTF-8")]
    InvalidTopic,
}

/// Encode a message into a freshly allocated buffer.
///
/// `topic` is only written for PUBLISH/SUBSCRIBE (a missing topic encodes as
/// the empty topic). ACK bodies are always empty, so `payload` is ignored for
/// them.
pub fn encode(header: &Header, topic: Option<&str>, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let body_len = body_len(header.msg_type, topic, payload)?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    put_header(&mut buf, header, body_len as u16);
    put_body(&mut buf, header.msg_type, topic, payload);
    Ok(buf.to_vec())
}

/// Encode a message into `dest`, returning the number of bytes written.
pub fn encode_into(
    header: &Header,
    topic: Option<&str>,
    payload: &[u8],
    dest: &mut [u8],
) -> Result<usize, CodecError> {
    let body_len = body_len(header.msg_type, topic, payload)?;
    let total = HEADER_LEN + body_len;
    if dest.len() < total {
        return Err(CodecError::BufferTooSmall {
            needed: total,
            capacity: dest.len(),
        });
    }

    let mut out = &mut dest[..total];
    put_header(&mut out, header, body_len as u16);
    put_body(&mut out, header.msg_type, topic, payload);
    Ok(total)
}

/// Encode a CONTROL message. `msg_type` is forced to CONTROL.
pub fn encode_control(
    header: &Header,
    ctrl_type: ControlType,
    data: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let body_len = 1 + data.len();
    if body_len > MAX_BODY_LEN {
        return Err(CodecError::BodyTooLarge { len: body_len });
    }

    let header = Header {
        msg_type: MsgType::Control,
        ..*header
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    put_header(&mut buf, &header, body_len as u16);
    buf.put_u8(ctrl_type as u8);
    buf.put_slice(data);
    Ok(buf.to_vec())
}

/// Decode a message using the protocol's own bounds for topic and data.
pub fn decode(buf: &[u8]) -> Result<Envelope, CodecError> {
    decode_with_limits(buf, MAX_TOPIC_LEN, MAX_BODY_LEN)
}

/// Decode a message, rejecting topics longer than `max_topic` bytes and data
/// longer than `max_data` bytes.
pub fn decode_with_limits(
    buf: &[u8],
    max_topic: usize,
    max_data: usize,
) -> Result<Envelope, CodecError> {
    let (header, body) = split_message(buf)?;

    if !header.msg_type.carries_topic() {
        if body.len() > max_data {
            return Err(CodecError::DataTooLong {
                len: body.len(),
                max: max_data,
            });
        }
        return Ok(Envelope {
            header,
            topic: None,
            payload: body.to_vec(),
        });
    }

    let topic_len = body.first().copied().map(usize::from).unwrap_or_default();
    if body.is_empty() || 1 + topic_len > body.len() {
        return Err(CodecError::TopicLengthOverrun {
            topic_len,
            payload_length: body.len(),
        });
    }
    if topic_len > max_topic {
        return Err(CodecError::TopicTooLong {
            len: topic_len,
            max: max_topic,
        });
    }

    let data = &body[1 + topic_len..];
    if data.len() > max_data {
        return Err(CodecError::DataTooLong {
            len: data.len(),
            max: max_data,
        });
    }

    let topic = std::str::from_utf8(&body[1..1 + topic_len])
        .map_err(|_| CodecError::InvalidTopic)?
        .to_string();

    Ok(Envelope {
        header,
        topic: Some(topic),
        payload: data.to_vec(),
    })
}

/// Decode a CONTROL message: header, control byte, trailing data.
pub fn decode_control(buf: &[u8]) -> Result<ControlMessage, CodecError> {
    decode_control_with_limit(buf, MAX_BODY_LEN)
}

pub fn decode_control_with_limit(buf: &[u8], max_data: usize) -> Result<ControlMessage, CodecError> {
    let (header, body) = split_message(buf)?;
    if header.msg_type != MsgType::Control {
        return Err(CodecError::NotControl(header.msg_type));
    }

    let (&ctrl_byte, data) = body.split_first().ok_or(CodecError::MissingControlType)?;
    let ctrl_type = ControlType::try_from(ctrl_byte)?;
    if data.len() > max_data {
        return Err(CodecError::DataTooLong {
            len: data.len(),
            max: max_data,
        });
    }

    Ok(ControlMessage {
        header,
        ctrl_type,
        data: data.to_vec(),
    })
}

/// Parse only the fixed header.
pub fn decode_header(buf: &[u8]) -> Result<Header, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::ShortBuffer { len: buf.len() });
    }

    let mut src = &buf[..HEADER_LEN];
    let version = src.get_u8();
    let msg_type = MsgType::try_from(src.get_u8())?;
    let qos_level = QosLevel::try_from(src.get_u8())?;

    Ok(Header {
        version,
        msg_type,
        qos_level,
        topic_id: src.get_u16(),
        msg_id: src.get_u32(),
        frag_id: src.get_u8(),
        frag_total: src.get_u8(),
        batch_size: src.get_u8(),
        payload_length: src.get_u16(),
        client_node_count: src.get_u8(),
    })
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(&self.header, self.topic.as_deref(), &self.payload)
    }
}

impl TryFrom<Envelope> for ControlMessage {
    type Error = CodecError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        if envelope.header.msg_type != MsgType::Control {
            return Err(CodecError::NotControl(envelope.header.msg_type));
        }
        let (&ctrl_byte, data) = envelope
            .payload
            .split_first()
            .ok_or(CodecError::MissingControlType)?;

        Ok(ControlMessage {
            header: envelope.header,
            ctrl_type: ControlType::try_from(ctrl_byte)?,
            data: data.to_vec(),
        })
    }
}

fn split_message(buf: &[u8]) -> Result<(Header, &[u8]), CodecError> {
    let header = decode_header(buf)?;
    let body = &buf[HEADER_LEN..];
    if body.len() != header.payload_length as usize {
        return Err(CodecError::LengthMismatch {
            declared: header.payload_length as usize,
            actual: body.len(),
        });
    }
    Ok((header, body))
}

fn body_len(msg_type: MsgType, topic: Option<&str>, payload: &[u8]) -> Result<usize, CodecError> {
    let len = match msg_type {
        MsgType::Publish | MsgType::Subscribe => {
            let topic_len = topic.map(str::len).unwrap_or_default();
            if topic_len > MAX_TOPIC_LEN {
                return Err(CodecError::TopicTooLong {
                    len: topic_len,
                    max: MAX_TOPIC_LEN,
                });
            }
            1 + topic_len + payload.len()
        }
        MsgType::Ack => 0,
        MsgType::Control | MsgType::NodeCountUpdate => payload.len(),
    };

    if len > MAX_BODY_LEN {
        return Err(CodecError::BodyTooLarge { len });
    }
    Ok(len)
}

fn put_header<B: BufMut>(buf: &mut B, header: &Header, payload_length: u16) {
    buf.put_u8(header.version);
    buf.put_u8(header.msg_type as u8);
    buf.put_u8(header.qos_level as u8);
    buf.put_u16(header.topic_id);
    buf.put_u32(header.msg_id);
    buf.put_u8(header.frag_id);
    buf.put_u8(header.frag_total);
    buf.put_u8(header.batch_size);
    buf.put_u16(payload_length);
    buf.put_u8(header.client_node_count);
}

fn put_body<B: BufMut>(buf: &mut B, msg_type: MsgType, topic: Option<&str>, payload: &[u8]) {
    match msg_type {
        MsgType::Publish | MsgType::Subscribe => {
            let topic = topic.unwrap_or_default();
            buf.put_u8(topic.len() as u8);
            buf.put_slice(topic.as_bytes());
            buf.put_slice(payload);
        }
        MsgType::Ack => {}
        MsgType::Control | MsgType::NodeCountUpdate => buf.put_slice(payload),
    }
}
