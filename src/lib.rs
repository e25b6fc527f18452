//! # SlimMQ
//!
//! `slimmq` is a lightweight publish/subscribe message bus with a compact
//! binary wire format. A broker routes messages by hierarchical topic
//! (`a/b/c`, with `+` and `#` wildcards) over UDP or length-prefixed TCP, and
//! clients publish with QoS 0, 1 or 2 using timed retransmission.
//!
//! ## Core Modules
//!
//! - `broker`: Topic index and the dispatch engine that turns each inbound packet into replies and fan-out.
//! - `client`: The publishing/subscribing client, its bounded event queue and QoS2 tracker.
//! - `config`: Loads settings from `config/default`, the environment and built-in defaults.
//! - `delivery`: Timestamped state tables for QoS1 dedup and the QoS2 handshake.
//! - `transport`: Wire codec, stream framing and the UDP/TCP broker loops.
//! - `utils`: Logging setup, the crate error type and small shared helpers.

pub mod broker;
pub mod client;
pub mod config;
pub mod delivery;
pub mod transport;
pub mod utils;
