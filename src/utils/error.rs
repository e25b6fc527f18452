//! Crate-level error type.
//!
//! Components return their own error enums (`CodecError`, `QueueError`,
//! `ClientError`); this type gathers them for callers that drive the whole
//! system, such as the binary.

use thiserror::Error;

use crate::client::{ClientError, QueueError};
use crate::transport::codec::CodecError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
