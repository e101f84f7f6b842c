use crate::network_config::WifiConfig;
use crate::wifi::{LinkDriver, LinkError};
use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
use log::info;
use std::net::Ipv4Addr;

/// Station-mode WiFi on the ESP32 radio
pub struct EspLink {
    wifi: Box<EspWifi<'static>>,
}

impl EspLink {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop, nvs: EspDefaultNvsPartition) -> Result<Self> {
        info!("🌐 WiFi: Creating EspWifi instance...");
        let wifi = EspWifi::new(modem, sysloop, Some(nvs))?;
        info!("✅ WiFi: EspWifi created");
        Ok(Self {
            wifi: Box::new(wifi),
        })
    }

    fn configure(&mut self, config: &WifiConfig) -> Result<(), esp_idf_svc::sys::EspError> {
        self.wifi.sta_netif_mut().set_hostname(&config.hostname)?;

        let configuration = Configuration::Client(ClientConfiguration {
            ssid: config.ssid.clone(),
            auth_method: AuthMethod::WPA2Personal,
            password: config.password.clone(),
            ..Default::default()
        });
        self.wifi.set_configuration(&configuration)?;

        if !self.wifi.is_started()? {
            info!("🌐 WiFi: Starting...");
            self.wifi.start()?;
        }
        self.wifi.connect()
    }
}

impl LinkDriver for EspLink {
    fn begin(&mut self, config: &WifiConfig) -> Result<(), LinkError> {
        self.configure(config)
            .map_err(|e| LinkError(format!("association with '{}' failed: {}", config.ssid, e)))
    }

    fn is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn address(&self) -> Option<Ipv4Addr> {
        if !self.wifi.is_up().unwrap_or(false) {
            return None;
        }
        let ip = self.wifi.sta_netif().get_ip_info().ok()?.ip;
        (!ip.is_unspecified()).then_some(ip)
    }
}
