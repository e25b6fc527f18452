use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::broker::SharedBroker;
use crate::utils::lock;

/// Serve the broker over an already bound datagram socket.
///
/// Each datagram is dispatched under the broker lock; replies and fan-out are
/// sent after the lock is released. Runs until the future is dropped.
pub async fn start_udp_broker(socket: UdpSocket, broker: SharedBroker, max_packet_size: usize) {
    match socket.local_addr() {
        Ok(addr) => info!("UDP broker listening on {addr}"),
        Err(e) => error!("UDP broker socket has no local address: {e}"),
    }

    let mut buf = vec![0u8; max_packet_size];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("UDP receive failed: {e}");
                continue;
            }
        };

        let outbound = lock(&broker).handle_datagram(peer, &buf[..len]);

        for out in outbound {
            match socket.send_to(&out.bytes, out.to).await {
                Ok(sent) => debug!(to = %out.to, sent, "UDP packet sent"),
                Err(e) => error!(to = %out.to, "UDP send failed: {e}"),
            }
        }
    }
}
