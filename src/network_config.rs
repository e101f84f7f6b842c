use crate::p1::P1Config;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub hostname: heapless::String<32>,
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    /// Default topic for telegram snapshots
    pub topic: heapless::String<64>,
    /// A random hex suffix is appended per boot
    pub client_id_prefix: heapless::String<16>,
    /// Pause between connection attempts (ms)
    pub retry_delay_ms: u32,
    /// How long a single connection attempt may take (ms)
    pub connect_timeout_ms: u32,
}

/// What to do when the WiFi link drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassociationPolicy {
    /// Log the loss and leave recovery to the broker reconnect on next publish
    #[default]
    Manual,
    /// Re-run the (blocking) association as soon as the loss is noticed
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub reassociation: ReassociationPolicy,
    /// Time given to each association attempt before retrying (ms)
    pub association_wait_ms: u32,
    /// Granularity of link state checks while associating (ms)
    pub poll_interval_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub p1: P1Config,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub link: LinkConfig,
}

/// Copy as much of `s` as fits
fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            hostname: bounded(option_env!("P1_HOSTNAME").unwrap_or("p1meter")),
            ssid: bounded(option_env!("P1_WIFI_SSID").unwrap_or("YOUR_SSID")),
            password: bounded(option_env!("P1_WIFI_PASSWORD").unwrap_or("YOUR_PASSWORD")),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: bounded(option_env!("P1_MQTT_HOST").unwrap_or("broker.hivemq.com")),
            port: option_env!("P1_MQTT_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1883),
            topic: bounded(option_env!("P1_MQTT_TOPIC").unwrap_or("home/groundfloor/p1meter")),
            client_id_prefix: bounded("ESP32Client-"),
            retry_delay_ms: 5_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reassociation: ReassociationPolicy::Manual,
            association_wait_ms: 10_000,
            poll_interval_ms: 250,
        }
    }
}

impl MqttConfig {
    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    /// `<prefix><suffix in hex>`, e.g. `ESP32Client-1a2b`
    pub fn client_id(&self, suffix: u16) -> heapless::String<32> {
        bounded(&format!("{}{:x}", self.client_id_prefix, suffix))
    }
}

impl AppConfig {
    /// Overlay a (partial) JSON document on the built-in defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
