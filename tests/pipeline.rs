use embedded_hal::blocking::delay::DelayMs;
use p1_mqtt_bridge::mqtt::{BrokerTransport, MQTT_CONNECT_FAILED};
use p1_mqtt_bridge::p1::crc::crc16;
use p1_mqtt_bridge::p1::{MemorySerial, UnconnectedPin};
use p1_mqtt_bridge::{
    BrokerSession, Clock, ConnectionState, FieldId, FrameOutcome, MqttConfig, P1Config, Pipeline,
    PublishError, Publisher, TelegramDecoder, TelegramReader, TransportError,
};
use std::cell::Cell;

struct TestClock<'a>(&'a Cell<u64>);

impl Clock for TestClock<'_> {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Default)]
struct Sink {
    sent: Vec<(String, String)>,
}

impl Publisher for Sink {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.sent
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }
}

/// Refuses the first `refusals` connection attempts
#[derive(Default)]
struct FlakyBroker {
    refusals: u32,
    connected: bool,
    connects: u32,
    published: Vec<Vec<u8>>,
}

impl BrokerTransport for FlakyBroker {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, _client_id: &str) -> Result<(), TransportError> {
        self.connects += 1;
        if self.connects <= self.refusals {
            return Err(TransportError::new(MQTT_CONNECT_FAILED));
        }
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, _topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.published.push(payload.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDelay(Vec<u32>);

impl DelayMs<u32> for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.push(ms);
    }
}

fn telegram(body: &str) -> Vec<u8> {
    let mut data = body.as_bytes().to_vec();
    data.push(b'!');
    let crc = crc16(&data);
    data.extend_from_slice(format!("{:04X}\r\n", crc).as_bytes());
    data
}

fn reader() -> TelegramReader<MemorySerial, UnconnectedPin> {
    TelegramReader::new(MemorySerial::new(), UnconnectedPin::default())
}

fn p1_config() -> P1Config {
    P1Config {
        cooldown_ms: 10_000,
        ..Default::default()
    }
}

#[test]
fn scenario_a_single_field_telegram_is_published() {
    let frame = telegram("/\r\n\r\n1-0:1.7.0(01.234*kW)\r\n");

    let record = TelegramDecoder::default().decode_bytes(&frame).unwrap();
    assert!(record.is_present(FieldId::PowerDelivered));
    assert_eq!(record.value(FieldId::PowerDelivered), Some(1.234));
    assert_eq!(record.present_count(), 1);

    let now = Cell::new(0);
    let mut pipeline = Pipeline::new(reader(), Sink::default(), TestClock(&now), &p1_config(), "p1");

    let first = pipeline.step();
    assert!(first.requested);
    assert!(first.frame.is_none());
    assert!(pipeline.source().request_pin().high);

    // The meter answers the request
    pipeline.source_mut().serial_mut().feed(&frame);
    now.set(1_000);
    let second = pipeline.step();
    assert!(!second.requested);
    assert!(matches!(second.frame, Some(FrameOutcome::Published { .. })));
    assert!(!pipeline.source().request_pin().high);

    let (topic, payload) = &pipeline.broker().sent[0];
    assert_eq!(topic, "p1");
    assert_eq!(payload, r#"{"power_delivered":1.234}"#);
}

#[test]
fn scenario_b_checksum_mismatch_skips_publish() {
    let mut frame = telegram("/\r\n\r\n1-0:1.7.0(01.234*kW)\r\n");
    let digit = frame.len() - 3;
    frame[digit] = if frame[digit] == b'0' { b'1' } else { b'0' };

    let now = Cell::new(500);
    let mut pipeline = Pipeline::new(reader(), Sink::default(), TestClock(&now), &p1_config(), "p1");
    pipeline.step();
    assert_eq!(pipeline.last_sample_ms(), Some(500));

    pipeline.source_mut().serial_mut().feed(&frame);
    now.set(600);
    match pipeline.step().frame {
        Some(FrameOutcome::DecodeFailed(e)) => {
            assert!(e.is_checksum_error());
            assert!(e.to_string().contains("checksum"));
        }
        other => panic!("expected a decode failure, got {:?}", other),
    }
    assert!(pipeline.broker().sent.is_empty());
    assert_eq!(pipeline.last_sample_ms(), Some(500));
    assert_eq!(pipeline.stats().decode_errors, 1);
}

#[test]
fn scenario_c_publish_reconnects_first() {
    let transport = FlakyBroker {
        refusals: 2,
        ..Default::default()
    };
    let mut session = BrokerSession::new(
        transport,
        RecordingDelay::default(),
        &MqttConfig::default(),
        0x00ff,
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);

    session.publish("p1", b"{}").unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.status().connect_attempts, 3);
    assert_eq!(session.delay().0, vec![5_000, 5_000]);
    assert_eq!(session.transport().published, vec![b"{}".to_vec()]);
}

#[test]
fn scenario_c_through_the_pipeline() {
    let frame = telegram("/\r\n\r\n1-0:1.7.0(01.234*kW)\r\n");
    let session = BrokerSession::new(
        FlakyBroker {
            refusals: 1,
            ..Default::default()
        },
        RecordingDelay::default(),
        &MqttConfig::default(),
        1,
    );

    let now = Cell::new(0);
    let mut pipeline = Pipeline::new(reader(), session, TestClock(&now), &p1_config(), "p1");
    pipeline.step();
    pipeline.source_mut().serial_mut().feed(&frame);
    let step = pipeline.step();

    assert!(matches!(step.frame, Some(FrameOutcome::Published { .. })));
    assert_eq!(pipeline.broker().status().connect_attempts, 2);
    assert_eq!(pipeline.broker().delay().0, vec![5_000]);
    assert_eq!(
        pipeline.broker().transport().published,
        vec![br#"{"power_delivered":1.234}"#.to_vec()]
    );
}

#[test]
fn scenario_d_silent_meter_is_not_an_error() {
    let now = Cell::new(0);
    let mut pipeline = Pipeline::new(reader(), Sink::default(), TestClock(&now), &p1_config(), "p1");

    for t in [0, 5_000, 10_001, 15_000, 20_002] {
        now.set(t);
        let step = pipeline.step();
        assert!(step.frame.is_none());
    }

    assert_eq!(pipeline.stats().requests, 3);
    assert_eq!(pipeline.source().stats().requests, 3);
    // Requests while one is still pending do not re-trigger the meter
    assert_eq!(pipeline.source().request_pin().rising_edges, 1);
    assert_eq!(pipeline.source().stats().frames, 0);
    assert_eq!(pipeline.stats().decode_errors, 0);
    assert!(pipeline.broker().sent.is_empty());
}

#[test]
fn stray_bytes_before_request_are_ignored() {
    let frame = telegram("/\r\n\r\n1-0:1.7.0(01.234*kW)\r\n");
    let now = Cell::new(0);
    let mut pipeline = Pipeline::new(reader(), Sink::default(), TestClock(&now), &p1_config(), "p1");

    // Arrives before the first poll; drained and discarded while idle
    pipeline.source_mut().serial_mut().feed(&frame);
    let step = pipeline.step();
    assert!(step.requested);
    assert!(step.frame.is_none());
    assert_eq!(pipeline.source().serial().pending(), 0);
}

#[test]
fn consecutive_samples_publish_in_order() {
    let now = Cell::new(0);
    let mut pipeline = Pipeline::new(reader(), Sink::default(), TestClock(&now), &p1_config(), "p1");

    for (i, t) in [0u64, 10_001, 20_002].into_iter().enumerate() {
        now.set(t);
        pipeline.step();
        let body = format!("/\r\n\r\n1-0:1.7.0(0{}.000*kW)\r\n", i + 1);
        pipeline.source_mut().serial_mut().feed(&telegram(&body));
        now.set(t + 1);
        pipeline.step();
    }

    let payloads: Vec<&str> = pipeline.broker().sent.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(
        payloads,
        vec![
            r#"{"power_delivered":1.0}"#,
            r#"{"power_delivered":2.0}"#,
            r#"{"power_delivered":3.0}"#,
        ]
    );
}
