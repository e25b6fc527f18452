//! CLI for SlimMQ
//!
//! Subcommands:
//! - `broker`: run the broker over UDP or TCP
//! - `publish`: send one message and wait for its QoS handshake
//! - `subscribe`: print messages arriving on a topic until interrupted

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use slimmq::broker::Broker;
use slimmq::client::{Client, ClientError};
use slimmq::config::{BrokerSettings, ClientSettings, TransportKind, load_config};
use slimmq::transport::message::QosLevel;
use slimmq::transport::{start_tcp_broker, start_udp_broker};
use slimmq::utils::error::{Error, Result};
use slimmq::utils::logging;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "slimmq", version, about = "Lightweight publish/subscribe bus")]
enum Command {
    /// Run the broker
    Broker {
        /// Socket type to serve on (default from config)
        #[arg(long, value_enum)]
        transport: Option<TransportKind>,
        /// Port to listen on (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Publish one message
    Publish {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        payload: String,
        /// QoS level 0, 1 or 2 (default from config)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: Option<u8>,
        /// Broker address as host:port (default from config)
        #[arg(long)]
        broker: Option<String>,
    },
    /// Subscribe to a topic pattern and print what arrives
    Subscribe {
        #[arg(long)]
        topic: String,
        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
        /// Broker address as host:port (default from config)
        #[arg(long)]
        broker: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Broker { transport, port } => {
            let mut broker = settings.broker;
            broker.transport = transport.unwrap_or(broker.transport);
            broker.port = port.unwrap_or(broker.port);
            run_broker(broker).await
        }
        Command::Publish {
            topic,
            payload,
            qos,
            broker,
        } => run_publish(settings.client, broker, topic, payload, qos).await,
        Command::Subscribe {
            topic,
            count,
            broker,
        } => run_subscribe(settings.client, broker, topic, count).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_broker(settings: BrokerSettings) -> Result<()> {
    let addr = settings.address();
    let broker = Broker::new().shared();

    tokio::spawn(Broker::start_sweep_loop(
        broker.clone(),
        settings.sweep_interval(),
        settings.pending_ttl(),
    ));

    match settings.transport {
        TransportKind::Udp => {
            let socket = UdpSocket::bind(&addr).await?;
            tokio::select! {
                _ = start_udp_broker(socket, broker, settings.max_packet_size) => {
                    error!("UDP broker exited unexpectedly.");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received. Exiting gracefully.");
                }
            }
        }
        TransportKind::Tcp => {
            let listener = TcpListener::bind(&addr).await?;
            tokio::select! {
                _ = start_tcp_broker(listener, broker, settings.max_packet_size) => {
                    error!("TCP broker exited unexpectedly.");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received. Exiting gracefully.");
                }
            }
        }
    }

    Ok(())
}

async fn run_publish(
    settings: ClientSettings,
    broker: Option<String>,
    topic: String,
    payload: String,
    qos: Option<u8>,
) -> Result<()> {
    let addr = resolve(broker.unwrap_or_else(|| settings.broker_address())).await?;
    let qos = QosLevel::try_from(qos.unwrap_or(settings.qos))?;
    let retry = settings.retry_policy();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut client = Client::connect(addr)?;
        client.set_retry_policy(retry);
        client.publish_with_qos(&topic, payload.as_bytes(), qos)?;
        info!("Published to {topic} with {qos}");
        client.close();
        Ok(())
    })
    .await?
}

async fn run_subscribe(
    settings: ClientSettings,
    broker: Option<String>,
    topic: String,
    count: Option<usize>,
) -> Result<()> {
    let addr = resolve(broker.unwrap_or_else(|| settings.broker_address())).await?;
    let client = Arc::new(Client::connect(addr)?);
    client.subscribe(&topic)?;

    let receiver = client.clone();
    let mut task = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut received = 0;
        while count.is_none_or(|max| received < max) {
            match receiver.next_event() {
                Ok(event) => {
                    received += 1;
                    println!(
                        "[{}] {} (id {}): {}",
                        event.timestamp,
                        event.topic,
                        event.msg_id,
                        String::from_utf8_lossy(&event.payload)
                    );
                }
                Err(ClientError::Closed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    });

    let interrupted = tokio::select! {
        joined = &mut task => {
            joined??;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Shutdown signal received. Exiting gracefully.");
        client.shutdown();
        task.await??;
    }

    Ok(())
}

async fn resolve(address: String) -> Result<SocketAddr> {
    tokio::net::lookup_host(&address)
        .await?
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("cannot resolve broker address {address}")))
}
