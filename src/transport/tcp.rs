use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::{Outbound, SharedBroker};
use crate::transport::framing::{recv_frame, send_frame};
use crate::utils::lock;

/// Open connections, keyed by peer address, each with its writer channel.
type Connections = Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>>;

/// Serve the broker over length-prefixed TCP connections.
///
/// Every accepted connection gets its own task. Outbound packets are routed
/// through a shared registry so a publish on one connection reaches
/// subscribers on the others.
pub async fn start_tcp_broker(listener: TcpListener, broker: SharedBroker, max_packet_size: usize) {
    match listener.local_addr() {
        Ok(addr) => info!("TCP broker listening on {addr}"),
        Err(e) => error!("TCP listener has no local address: {e}"),
    }

    let connections: Connections = Arc::default();

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {e}");
                continue;
            }
        };

        let broker = broker.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, broker, connections, max_packet_size).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: SharedBroker,
    connections: Connections,
    max_packet_size: usize,
) {
    info!("{peer} connected");
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    lock(&connections).insert(peer, tx);

    // The writer ends once the registry entry (the only sender) is removed
    // and the channel drains.
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = send_frame(&mut writer, &bytes).await {
                error!(%peer, "Failed to send frame: {e}");
                break;
            }
        }
        debug!(%peer, "Send loop closed");
    });

    loop {
        match recv_frame(&mut reader, max_packet_size).await {
            Ok(Some(frame)) => {
                let outbound = lock(&broker).handle_datagram(peer, &frame);
                route(&connections, outbound);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, "Closing connection: {e}");
                break;
            }
        }
    }

    lock(&connections).remove(&peer);
    info!("{peer} disconnected");
}

fn route(connections: &Connections, outbound: Vec<Outbound>) {
    let connections = lock(connections);
    for out in outbound {
        match connections.get(&out.to) {
            Some(tx) => {
                if tx.send(out.bytes).is_err() {
                    debug!(to = %out.to, "Writer already closed, dropping packet");
                }
            }
            None => debug!(to = %out.to, "No open connection for subscriber, dropping packet"),
        }
    }
}
