#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::PinDriver;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys;
    use p1_mqtt_bridge::esp::{self, EspBroker, EspLink};
    use p1_mqtt_bridge::{
        AppConfig, BrokerSession, ConnectivityManager, FrameOutcome, LoggingObserver,
        MonotonicClock, Pipeline, StatusLed, TelegramReader,
    };

    // Initialize ESP-IDF system services
    sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let config = AppConfig::default();

    log::info!("P1 Smart Meter Bridge v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Reads DSMR telegrams from the P1 port and publishes them to MQTT");
    log::info!(
        "  P1: UART2 RX=GPIO16 TX=GPIO17 @ {} baud, request=GPIO4",
        config.p1.baud_rate
    );
    log::info!("  Sample every {} ms", config.p1.cooldown_ms);

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    log::info!("✅ ESP32 initialized with ESP-IDF");

    let uart_config = UartConfig::new().baudrate(config.p1.baud_rate.into());
    let uart = UartDriver::new(
        peripherals.uart2,
        peripherals.pins.gpio17, // TX
        peripherals.pins.gpio16, // RX
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        &uart_config,
    )?;
    log::info!("✅ UART2 initialized ({} baud)", config.p1.baud_rate);

    // Request line starts LOW: the meter stays quiet until asked
    let request_pin = PinDriver::output(peripherals.pins.gpio4)?;
    let mut led = StatusLed::new(PinDriver::output(peripherals.pins.gpio2)?);
    // Alive
    led.flash(&mut FreeRtos, 100);

    let reader = TelegramReader::new(uart, request_pin);

    let link = EspLink::new(peripherals.modem, sysloop, nvs)?;
    let mut connectivity =
        ConnectivityManager::new(link, FreeRtos, config.wifi.clone(), config.link.clone());
    connectivity.register(Box::new(LoggingObserver));
    connectivity.connect();

    let mut broker = BrokerSession::new(
        EspBroker::new(&config.mqtt),
        FreeRtos,
        &config.mqtt,
        esp::random_u16(),
    );
    broker.ensure_connected();

    let mut pipeline = Pipeline::new(
        reader,
        broker,
        MonotonicClock::new(),
        &config.p1,
        &config.mqtt.topic,
    )
    .with_link(connectivity);

    pipeline.run_with(&mut FreeRtos, config.p1.idle_delay_ms, |step| {
        if matches!(
            step.frame,
            Some(FrameOutcome::Published { .. }) | Some(FrameOutcome::PublishFailed(_))
        ) {
            led.flash(&mut FreeRtos, 100);
        }
    })
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "p1_reader v{} is ESP32 firmware; build it for an espidf target.",
        env!("CARGO_PKG_VERSION")
    );
    println!("Use p1_decode to decode captured telegrams on this machine.");
}
