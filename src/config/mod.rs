mod settings;

use crate::config::settings::PartialSettings;
use crate::transport::message::QosLevel;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, ClientSettings, LoggingSettings, Settings, TransportKind,
};

/// Loads the configuration from `.env`, the default file and environment
/// variables (`SLIMMQ_<SECTION>__<KEY>`, e.g. `SLIMMQ_BROKER__PORT=9100`).
/// Merges the configuration with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("SLIMMQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let broker = partial.broker;
    let client = partial.client;

    let settings = Settings {
        broker: BrokerSettings {
            host: broker
                .as_ref()
                .and_then(|b| b.host.clone())
                .unwrap_or(default.broker.host),
            port: broker
                .as_ref()
                .and_then(|b| b.port)
                .unwrap_or(default.broker.port),
            transport: broker
                .as_ref()
                .and_then(|b| b.transport)
                .unwrap_or(default.broker.transport),
            max_packet_size: broker
                .as_ref()
                .and_then(|b| b.max_packet_size)
                .unwrap_or(default.broker.max_packet_size),
            pending_ttl_secs: broker
                .as_ref()
                .and_then(|b| b.pending_ttl_secs)
                .unwrap_or(default.broker.pending_ttl_secs),
            sweep_interval_secs: broker
                .as_ref()
                .and_then(|b| b.sweep_interval_secs)
                .unwrap_or(default.broker.sweep_interval_secs),
        },
        client: ClientSettings {
            broker_host: client
                .as_ref()
                .and_then(|c| c.broker_host.clone())
                .unwrap_or(default.client.broker_host),
            broker_port: client
                .as_ref()
                .and_then(|c| c.broker_port)
                .unwrap_or(default.client.broker_port),
            qos: client
                .as_ref()
                .and_then(|c| c.qos)
                .unwrap_or(default.client.qos),
            retry_timeout_ms: client
                .as_ref()
                .and_then(|c| c.retry_timeout_ms)
                .unwrap_or(default.client.retry_timeout_ms),
            max_retries: client
                .as_ref()
                .and_then(|c| c.max_retries)
                .unwrap_or(default.client.max_retries),
            poll_interval_ms: client
                .as_ref()
                .and_then(|c| c.poll_interval_ms)
                .unwrap_or(default.client.poll_interval_ms),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    };

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if QosLevel::try_from(settings.client.qos).is_err() {
        return Err(ConfigError::Message(format!(
            "client.qos must be 0, 1 or 2, got {}",
            settings.client.qos
        )));
    }
    if settings.broker.max_packet_size == 0 {
        return Err(ConfigError::Message(
            "broker.max_packet_size must be positive".to_string(),
        ));
    }
    if settings.broker.sweep_interval_secs == 0 {
        return Err(ConfigError::Message(
            "broker.sweep_interval_secs must be positive".to_string(),
        ));
    }
    if settings.client.poll_interval_ms == 0 {
        return Err(ConfigError::Message(
            "client.poll_interval_ms must be positive".to_string(),
        ));
    }
    Ok(())
}
