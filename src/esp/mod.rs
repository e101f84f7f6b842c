//! ESP-IDF adapters for the hardware seams of the bridge

pub mod mqtt;
pub mod serial;
pub mod wifi;

pub use mqtt::EspBroker;
pub use wifi::EspLink;

/// 16 bits from the hardware RNG, used to make the MQTT client id unique
/// per boot
pub fn random_u16() -> u16 {
    // SAFETY: esp_random has no preconditions
    (unsafe { esp_idf_sys::esp_random() } & 0xffff) as u16
}
