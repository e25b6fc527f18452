use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::client::RetryPolicy;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker, the client commands and logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Which socket type the broker serves on.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// Configuration settings for the broker.
///
/// Bind address, transport, packet limit and delivery-state retention.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub max_packet_size: usize,
    pub pending_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl BrokerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Configuration settings for the `publish` and `subscribe` commands.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub broker_host: String,
    pub broker_port: u16,
    /// Default QoS level, 0 to 2.
    pub qos: u8,
    pub retry_timeout_ms: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
}

impl ClientSettings {
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.retry_timeout_ms),
            max_retries: self.max_retries,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<TransportKind>,
    pub max_packet_size: Option<usize>,
    pub pending_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub qos: Option<u8>,
    pub retry_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "0.0.0.0".to_string(),
                port: 9000,
                transport: TransportKind::Udp,
                max_packet_size: 2048,
                pending_ttl_secs: 60,
                sweep_interval_secs: 10,
            },
            client: ClientSettings {
                broker_host: "127.0.0.1".to_string(),
                broker_port: 9000,
                qos: 0,
                retry_timeout_ms: 1000,
                max_retries: 5,
                poll_interval_ms: 10,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
