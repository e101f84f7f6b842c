use crate::network_config::MqttConfig;
use crate::ConnectionState;
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};
use thiserror::Error;

/// Return codes reported by transports, following the PubSubClient numbering
pub const MQTT_CONNECTION_TIMEOUT: i32 = -4;
pub const MQTT_CONNECTION_LOST: i32 = -3;
pub const MQTT_CONNECT_FAILED: i32 = -2;
pub const MQTT_DISCONNECTED: i32 = -1;

/// Failure reported by the underlying MQTT client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rc={code}")]
pub struct TransportError {
    pub code: i32,
}

impl TransportError {
    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

/// A single publish attempt failed; the payload is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error sending message to '{topic}': rc={code}")]
pub struct PublishError {
    pub topic: String,
    pub code: i32,
}

/// The MQTT client underneath a [`BrokerSession`]
pub trait BrokerTransport {
    fn is_connected(&self) -> bool;

    /// One connection attempt with the given client identity
    fn connect(&mut self, client_id: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Where the pipeline sends finished payloads
pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MqttStatus {
    pub broker_url: String,
    pub client_id: String,
    pub connect_attempts: u32,
    pub sessions: u32,
    pub publish_count: u32,
    pub failed_publishes: u32,
    pub last_published_topic: String,
}

/// Broker session with lazy, blocking reconnect.
///
/// `ensure_connected` retries forever with a fixed pause between attempts and
/// holds the caller for the whole time. Nothing else runs on the loop while it
/// does, so P1 bytes pile up in the UART buffer.
pub struct BrokerSession<T, D> {
    transport: T,
    delay: D,
    client_id: heapless::String<32>,
    retry_delay_ms: u32,
    state: ConnectionState,
    status: MqttStatus,
}

impl<T, D> BrokerSession<T, D>
where
    T: BrokerTransport,
    D: DelayMs<u32>,
{
    /// `client_suffix` should differ per boot (hardware RNG on the board) so
    /// two readers sharing a broker do not kick each other off.
    pub fn new(transport: T, delay: D, config: &MqttConfig, client_suffix: u16) -> Self {
        let client_id = config.client_id(client_suffix);
        info!("Initializing MQTT session...");
        info!("  Broker: {}", config.broker_url());
        info!("  Client ID: {}", client_id);

        let status = MqttStatus {
            broker_url: config.broker_url(),
            client_id: client_id.to_string(),
            ..Default::default()
        };

        Self {
            transport,
            delay,
            client_id,
            retry_delay_ms: config.retry_delay_ms,
            state: ConnectionState::Disconnected,
            status,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &MqttStatus {
        &self.status
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Block until the broker session is up. Returns the number of connection
    /// attempts that were needed (0 when already connected).
    pub fn ensure_connected(&mut self) -> u32 {
        if self.transport.is_connected() {
            self.state = ConnectionState::Connected;
            return 0;
        }
        if self.state == ConnectionState::Connected {
            info!("🔌 MQTT connection lost");
        }
        self.state = ConnectionState::Connecting;

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.status.connect_attempts += 1;
            info!("🔄 Attempting MQTT connection as '{}'...", self.client_id);

            match self.transport.connect(&self.client_id) {
                Ok(()) => {
                    info!("✅ MQTT connected");
                    self.state = ConnectionState::Connected;
                    self.status.sessions += 1;
                    return attempts;
                }
                Err(e) => {
                    warn!(
                        "❌ MQTT connection failed, {} try again in {} ms",
                        e, self.retry_delay_ms
                    );
                    self.delay.delay_ms(self.retry_delay_ms);
                }
            }
        }
    }

    /// One publish attempt, after making sure the session is up
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.ensure_connected();

        log::debug!("sending msg to {}: {} bytes", topic, payload.len());
        match self.transport.publish(topic, payload) {
            Ok(()) => {
                self.status.publish_count += 1;
                self.status.last_published_topic.clear();
                self.status.last_published_topic.push_str(topic);
                info!("📤 MQTT published to '{}': {} bytes", topic, payload.len());
                Ok(())
            }
            Err(e) => {
                self.status.failed_publishes += 1;
                if !self.transport.is_connected() {
                    self.state = ConnectionState::Disconnected;
                }
                Err(PublishError {
                    topic: topic.to_string(),
                    code: e.code,
                })
            }
        }
    }
}

impl<T, D> Publisher for BrokerSession<T, D>
where
    T: BrokerTransport,
    D: DelayMs<u32>,
{
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        BrokerSession::publish(self, topic, payload)
    }
}
