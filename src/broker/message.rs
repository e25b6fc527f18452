//! Outbound messages produced by the broker
//!
//! Dispatch never touches the network. It returns the encoded packets to send
//! and their destinations; the transport loop sends them after the broker lock
//! has been released.

use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

impl Outbound {
    pub fn new(to: SocketAddr, bytes: Vec<u8>) -> Self {
        Self { to, bytes }
    }
}
