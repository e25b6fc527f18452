//! The `transport` module covers everything between the broker/client logic
//! and the network.
//!
//! It defines the binary wire format (`message`, `codec`), the length-prefixed
//! framing used on stream connections (`framing`), and the two broker
//! front-ends: a datagram loop (`udp`) and a per-connection stream server
//! (`tcp`). The `DatagramTransport` trait is the seam the client sends and
//! receives through.

pub mod codec;
pub mod framing;
pub mod message;
pub mod tcp;
pub mod udp;

use std::io;
use std::net::{SocketAddr, UdpSocket};

pub use codec::CodecError;
pub use message::{ControlMessage, ControlType, Envelope, Header, MsgType, QosLevel};
pub use tcp::start_tcp_broker;
pub use udp::start_udp_broker;

/// A connectionless, message-oriented socket.
///
/// `recv_from` is expected to honour a read timeout; `WouldBlock` and
/// `TimedOut` are treated by callers as an idle tick.
pub trait DatagramTransport: Send + Sync + 'static {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramTransport for UdpSocket {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, bytes, dest)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

/// True for the error kinds a timed-out blocking receive produces.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
