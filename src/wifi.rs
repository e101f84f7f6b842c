use crate::network_config::{LinkConfig, ReassociationPolicy, WifiConfig};
use crate::ConnectionState;
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("link error: {0}")]
pub struct LinkError(pub String);

/// Station-mode network interface
pub trait LinkDriver {
    /// Kick off association with the configured network. Does not wait for
    /// it to complete.
    fn begin(&mut self, config: &WifiConfig) -> Result<(), LinkError>;

    fn is_associated(&self) -> bool;

    /// Address obtained via DHCP, if any
    fn address(&self) -> Option<Ipv4Addr>;
}

/// Link transitions, fired exactly once each
pub trait LinkObserver {
    fn on_associated(&mut self, _ssid: &str) {}
    fn on_address_acquired(&mut self, _ip: Ipv4Addr) {}
    fn on_disassociated(&mut self) {}
}

/// Writes link transitions to the console
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl LinkObserver for LoggingObserver {
    fn on_associated(&mut self, ssid: &str) {
        info!("✅ WiFi: Connected to AP '{}'", ssid);
    }

    fn on_address_acquired(&mut self, ip: Ipv4Addr) {
        info!("🌐 WiFi: IP address: {}", ip);
    }

    fn on_disassociated(&mut self) {
        warn!("🔌 WiFi: Disconnected");
    }
}

/// Driven once per loop iteration by the scheduler
pub trait LinkService {
    fn service(&mut self);
}

impl LinkService for () {
    fn service(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub association_attempts: u32,
    pub disassociations: u32,
    pub reassociations: u32,
}

/// Owns the WiFi association and reports its transitions to observers.
pub struct ConnectivityManager<L, D> {
    driver: L,
    delay: D,
    wifi: WifiConfig,
    link: LinkConfig,
    state: ConnectionState,
    associated: bool,
    address: Option<Ipv4Addr>,
    observers: Vec<Box<dyn LinkObserver>>,
    stats: LinkStats,
}

impl<L, D> ConnectivityManager<L, D>
where
    L: LinkDriver,
    D: DelayMs<u32>,
{
    pub fn new(driver: L, delay: D, wifi: WifiConfig, link: LinkConfig) -> Self {
        Self {
            driver,
            delay,
            wifi,
            link,
            state: ConnectionState::Disconnected,
            associated: false,
            address: None,
            observers: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    pub fn register(&mut self, observer: Box<dyn LinkObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn driver(&self) -> &L {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut L {
        &mut self.driver
    }

    /// Block until associated and addressed. Retries forever; returns the
    /// number of association attempts used.
    pub fn connect(&mut self) -> u32 {
        self.state = ConnectionState::Connecting;
        let wait_ms = self.link.association_wait_ms;
        let step_ms = self.link.poll_interval_ms.clamp(1, wait_ms.max(1));

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.stats.association_attempts += 1;
            info!("🌐 WiFi: connecting to '{}'...", self.wifi.ssid);

            match self.driver.begin(&self.wifi) {
                Ok(()) => {
                    let mut waited = 0;
                    loop {
                        self.refresh();
                        if self.state == ConnectionState::Connected {
                            return attempts;
                        }
                        if waited >= wait_ms {
                            break;
                        }
                        self.delay.delay_ms(step_ms);
                        waited += step_ms;
                    }
                    warn!("WiFi: not connected after {} ms, retrying", wait_ms);
                }
                Err(e) => {
                    warn!("WiFi: {}, retrying in {} ms", e, wait_ms);
                    self.delay.delay_ms(wait_ms);
                }
            }
        }
    }

    /// Compare the driver's view with the last one seen and fire events for
    /// what changed.
    fn refresh(&mut self) {
        let associated = self.driver.is_associated();
        let address = if associated { self.driver.address() } else { None };

        if associated && !self.associated {
            self.associated = true;
            let ssid = self.wifi.ssid.clone();
            self.notify(|o| o.on_associated(&ssid));
        }
        if let (Some(ip), None) = (address, self.address) {
            self.address = Some(ip);
            self.notify(|o| o.on_address_acquired(ip));
        }
        if !associated && self.associated {
            self.associated = false;
            self.address = None;
            self.stats.disassociations += 1;
            self.notify(|o| o.on_disassociated());
        }

        self.state = match (associated && address.is_some(), self.state) {
            (true, _) => ConnectionState::Connected,
            (false, ConnectionState::Connecting) => ConnectionState::Connecting,
            (false, _) => ConnectionState::Disconnected,
        };
    }

    fn notify(&mut self, mut event: impl FnMut(&mut dyn LinkObserver)) {
        for observer in self.observers.iter_mut() {
            event(observer.as_mut());
        }
    }
}

impl<L, D> LinkService for ConnectivityManager<L, D>
where
    L: LinkDriver,
    D: DelayMs<u32>,
{
    fn service(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.refresh();
        if !was_connected || self.state == ConnectionState::Connected {
            return;
        }

        match self.link.reassociation {
            ReassociationPolicy::Manual => {
                info!("WiFi: link lost, leaving recovery to the broker reconnect");
            }
            ReassociationPolicy::Automatic => {
                self.stats.reassociations += 1;
                info!("WiFi: link lost, re-associating");
                self.connect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Associated(String),
        Address(Ipv4Addr),
        Disassociated,
    }

    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl LinkObserver for Recorder {
        fn on_associated(&mut self, ssid: &str) {
            self.0.borrow_mut().push(Event::Associated(ssid.to_string()));
        }

        fn on_address_acquired(&mut self, ip: Ipv4Addr) {
            self.0.borrow_mut().push(Event::Address(ip));
        }

        fn on_disassociated(&mut self) {
            self.0.borrow_mut().push(Event::Disassociated);
        }
    }

    /// Associates on the n-th `begin`, gets an address one poll later
    #[derive(Default)]
    struct FakeRadio {
        begins: u32,
        associate_on: u32,
        associated: bool,
        polls_since_assoc: std::cell::Cell<u32>,
    }

    impl LinkDriver for FakeRadio {
        fn begin(&mut self, _config: &WifiConfig) -> Result<(), LinkError> {
            self.begins += 1;
            if self.begins >= self.associate_on {
                self.associated = true;
                self.polls_since_assoc.set(0);
            }
            Ok(())
        }

        fn is_associated(&self) -> bool {
            self.associated
        }

        fn address(&self) -> Option<Ipv4Addr> {
            let polls = self.polls_since_assoc.get();
            self.polls_since_assoc.set(polls + 1);
            (self.associated && polls >= 1).then(|| Ipv4Addr::new(192, 168, 1, 42))
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        total_ms: u64,
    }

    impl DelayMs<u32> for CountingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += ms as u64;
        }
    }

    fn manager(
        associate_on: u32,
        policy: ReassociationPolicy,
    ) -> (ConnectivityManager<FakeRadio, CountingDelay>, Rc<RefCell<Vec<Event>>>) {
        let link = LinkConfig {
            reassociation: policy,
            association_wait_ms: 1_000,
            poll_interval_ms: 250,
        };
        let radio = FakeRadio {
            associate_on,
            ..Default::default()
        };
        let mut manager =
            ConnectivityManager::new(radio, CountingDelay::default(), WifiConfig::default(), link);
        let events = Rc::new(RefCell::new(Vec::new()));
        manager.register(Box::new(Recorder(events.clone())));
        (manager, events)
    }

    #[test]
    fn test_connect_fires_events_in_order() {
        let (mut manager, events) = manager(1, ReassociationPolicy::Manual);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.connect(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Associated(WifiConfig::default().ssid.to_string()),
                Event::Address(Ipv4Addr::new(192, 168, 1, 42)),
            ]
        );
    }

    #[test]
    fn test_connect_retries_until_associated() {
        let (mut manager, events) = manager(3, ReassociationPolicy::Manual);
        assert_eq!(manager.connect(), 3);
        assert_eq!(manager.stats().association_attempts, 3);
        // Two failed attempts waited the full association window
        assert!(manager.delay.total_ms >= 2_000);
        assert_eq!(events.borrow().len(), 2);
    }

    #[test]
    fn test_service_without_change_fires_nothing() {
        let (mut manager, events) = manager(1, ReassociationPolicy::Manual);
        manager.connect();
        manager.service();
        manager.service();
        assert_eq!(events.borrow().len(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_manual_policy_does_not_reassociate() {
        let (mut manager, events) = manager(1, ReassociationPolicy::Manual);
        manager.connect();
        manager.driver_mut().associated = false;

        manager.service();
        manager.service();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(events.borrow().last(), Some(&Event::Disassociated));
        assert_eq!(
            events
                .borrow()
                .iter()
                .filter(|e| **e == Event::Disassociated)
                .count(),
            1
        );
        assert_eq!(manager.stats().reassociations, 0);
        assert_eq!(manager.driver().begins, 1);
    }

    #[test]
    fn test_automatic_policy_reassociates() {
        let (mut manager, events) = manager(1, ReassociationPolicy::Automatic);
        manager.connect();
        manager.driver_mut().associated = false;

        manager.service();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.stats().reassociations, 1);
        assert_eq!(manager.driver().begins, 2);
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Associated(WifiConfig::default().ssid.to_string()),
                Event::Address(Ipv4Addr::new(192, 168, 1, 42)),
                Event::Disassociated,
                Event::Associated(WifiConfig::default().ssid.to_string()),
                Event::Address(Ipv4Addr::new(192, 168, 1, 42)),
            ]
        );
    }
}
