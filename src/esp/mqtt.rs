use crate::mqtt::{
    BrokerTransport, TransportError, MQTT_CONNECTION_TIMEOUT, MQTT_CONNECT_FAILED, MQTT_DISCONNECTED,
};
use crate::network_config::MqttConfig;
use embedded_svc::mqtt::client::QoS;
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration,
};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-connection flags shared with the event thread
#[derive(Default)]
struct SessionFlags {
    connected: AtomicBool,
    shutdown: AtomicBool,
}

/// MQTT over the ESP-IDF client.
///
/// Every `connect` builds a fresh client with the requested client id and
/// waits (bounded by `connect_timeout_ms`) for the broker to accept it.
pub struct EspBroker {
    broker_url: String,
    connect_timeout: Duration,
    client: Option<EspMqttClient<'static>>,
    flags: Arc<SessionFlags>,
}

impl EspBroker {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            broker_url: config.broker_url(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms as u64),
            client: None,
            flags: Arc::new(SessionFlags::default()),
        }
    }

    fn teardown(&mut self) {
        self.flags.shutdown.store(true, Ordering::Relaxed);
        self.flags.connected.store(false, Ordering::Relaxed);
        self.client = None;
    }
}

fn drive_connection(mut connection: EspMqttConnection, flags: Arc<SessionFlags>) {
    info!("MQTT connection handler started");
    while !flags.shutdown.load(Ordering::Relaxed) {
        match connection.next() {
            Ok(event) => match event.payload() {
                EventPayload::Connected(session_present) => {
                    info!("✅ MQTT connected to broker (session_present: {})", session_present);
                    flags.connected.store(true, Ordering::Relaxed);
                }
                EventPayload::Disconnected => {
                    info!("🔌 MQTT disconnected from broker");
                    flags.connected.store(false, Ordering::Relaxed);
                }
                EventPayload::Error(e) => {
                    warn!("❌ MQTT error: {:?}", e);
                }
                _ => {}
            },
            Err(_) => break,
        }
    }
    flags.connected.store(false, Ordering::Relaxed);
    info!("🔌 MQTT connection handler exiting");
}

impl BrokerTransport for EspBroker {
    fn is_connected(&self) -> bool {
        self.client.is_some() && self.flags.connected.load(Ordering::Relaxed)
    }

    fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.teardown();

        let mqtt_config = MqttClientConfiguration {
            client_id: Some(client_id),
            keep_alive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        let (client, connection) = EspMqttClient::new(&self.broker_url, &mqtt_config).map_err(|e| {
            warn!("MQTT client creation failed: {}", e);
            TransportError::new(MQTT_CONNECT_FAILED)
        })?;

        let flags = Arc::new(SessionFlags::default());
        let thread_flags = flags.clone();
        std::thread::Builder::new()
            .stack_size(8192)
            .name("mqtt_conn".to_string())
            .spawn(move || drive_connection(connection, thread_flags))
            .map_err(|e| {
                warn!("MQTT connection thread failed to start: {}", e);
                TransportError::new(MQTT_CONNECT_FAILED)
            })?;

        self.client = Some(client);
        self.flags = flags;

        let started = Instant::now();
        while !self.flags.connected.load(Ordering::Relaxed) {
            if started.elapsed() >= self.connect_timeout {
                self.teardown();
                return Err(TransportError::new(MQTT_CONNECTION_TIMEOUT));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let client = self
            .client
            .as_mut()
            .ok_or(TransportError::new(MQTT_DISCONNECTED))?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|e| TransportError::new(e.code()))
    }
}
