//! ESP32 P1 (DSMR) smart meter to MQTT bridge
//!
//! Reads telegrams from the meter's P1 port, decodes them and publishes the
//! present fields as a JSON document to an MQTT broker.

#[cfg(target_os = "espidf")]
pub mod esp;
pub mod led;
pub mod mqtt;
pub mod network_config;
pub mod p1;
pub mod pipeline;
pub mod wifi;

/// State of a connectivity surface (WiFi link or broker session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

pub use led::StatusLed;
pub use mqtt::{BrokerSession, BrokerTransport, MqttStatus, PublishError, Publisher, TransportError};
pub use network_config::{AppConfig, LinkConfig, MqttConfig, ReassociationPolicy, WifiConfig};
pub use p1::{
    DecodeError, FieldId, FieldValue, P1Config, Payload, PayloadBuilder, RawFrame,
    TelegramDecoder, TelegramReader, TelegramRecord, TelegramSource,
};
pub use pipeline::{Clock, FrameOutcome, MonotonicClock, Pipeline, PipelineStats, Step};
pub use wifi::{ConnectivityManager, LinkDriver, LinkError, LinkObserver, LinkService, LoggingObserver};
