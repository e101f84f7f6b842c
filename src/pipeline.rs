//! The acquire / decode / publish control loop.
//!
//! Single threaded and cooperative: every stage runs from [`Pipeline::step`]
//! in a fixed order. Polling the acquirer never blocks, but a broker
//! reconnect inside `publish` (and a WiFi re-association under
//! [`ReassociationPolicy::Automatic`]) holds the loop until it succeeds.
//! While that happens no serial bytes are drained.
//!
//! [`ReassociationPolicy::Automatic`]: crate::network_config::ReassociationPolicy

use crate::mqtt::{PublishError, Publisher};
use crate::p1::{
    DecodeError, P1Config, PayloadBuilder, RawFrame, TelegramDecoder, TelegramSource,
};
use crate::wifi::LinkService;
use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, warn};
use std::time::Instant;

/// Millisecond time source for the sample schedule
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// What happened to a completed frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Published { bytes: usize },
    DecodeFailed(DecodeError),
    PublishFailed(PublishError),
}

/// Summary of one loop iteration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// A sample request was issued this iteration
    pub requested: bool,
    pub frame: Option<FrameOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub iterations: u64,
    pub requests: u32,
    pub decoded: u32,
    pub decode_errors: u32,
    pub checksum_errors: u32,
    pub published: u32,
    pub publish_errors: u32,
}

pub struct Pipeline<A, B, C, N = ()> {
    source: A,
    broker: B,
    clock: C,
    link: N,
    decoder: TelegramDecoder,
    builder: PayloadBuilder,
    topic: String,
    cooldown_ms: u64,
    last_sample: Option<u64>,
    stats: PipelineStats,
}

impl<A, B, C> Pipeline<A, B, C>
where
    A: TelegramSource,
    B: Publisher,
    C: Clock,
{
    pub fn new(source: A, broker: B, clock: C, config: &P1Config, topic: &str) -> Self {
        Self {
            source,
            broker,
            clock,
            link: (),
            decoder: TelegramDecoder::new(config.fields),
            builder: PayloadBuilder::new(),
            topic: topic.to_string(),
            cooldown_ms: config.cooldown_ms,
            last_sample: None,
            stats: PipelineStats::default(),
        }
    }

    /// Service `link` at the top of every iteration
    pub fn with_link<N: LinkService>(self, link: N) -> Pipeline<A, B, C, N> {
        Pipeline {
            source: self.source,
            broker: self.broker,
            clock: self.clock,
            link,
            decoder: self.decoder,
            builder: self.builder,
            topic: self.topic,
            cooldown_ms: self.cooldown_ms,
            last_sample: self.last_sample,
            stats: self.stats,
        }
    }
}

impl<A, B, C, N> Pipeline<A, B, C, N>
where
    A: TelegramSource,
    B: Publisher,
    C: Clock,
    N: LinkService,
{
    pub fn source(&self) -> &A {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut A {
        &mut self.source
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn link(&self) -> &N {
        &self.link
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_topic(&mut self, topic: &str) {
        self.topic.clear();
        self.topic.push_str(topic);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Time of the last sample request, `None` before the first iteration
    pub fn last_sample_ms(&self) -> Option<u64> {
        self.last_sample
    }

    fn sample_due(&self, now: u64) -> bool {
        match self.last_sample {
            None => true,
            Some(last) => now.saturating_sub(last) > self.cooldown_ms,
        }
    }

    pub fn step(&mut self) -> Step {
        self.stats.iterations += 1;
        self.link.service();

        self.source.poll();

        let now = self.clock.now_ms();
        let requested = self.sample_due(now);
        if requested {
            self.stats.requests += 1;
            if self.source.request_sample() {
                debug!("P1: sample requested at {} ms", now);
            }
            self.last_sample = Some(now);
        }

        let frame = if self.source.frame_ready() {
            self.source.take_frame().map(|frame| self.handle_frame(frame))
        } else {
            None
        };

        Step { requested, frame }
    }

    fn handle_frame(&mut self, frame: RawFrame) -> FrameOutcome {
        let record = match self.decoder.decode(frame) {
            Ok(record) => record,
            Err(e) => {
                self.stats.decode_errors += 1;
                if e.is_checksum_error() {
                    self.stats.checksum_errors += 1;
                }
                warn!("❌ P1: {}", e);
                return FrameOutcome::DecodeFailed(e);
            }
        };

        self.stats.decoded += 1;
        info!("📊 P1: telegram decoded, {} fields", record.present_count());
        record.log_fields();

        let payload = self.builder.build(&record);
        match self.broker.publish(&self.topic, payload.as_bytes()) {
            Ok(()) => {
                self.stats.published += 1;
                FrameOutcome::Published {
                    bytes: payload.len(),
                }
            }
            Err(e) => {
                self.stats.publish_errors += 1;
                warn!("❌ MQTT: {}", e);
                FrameOutcome::PublishFailed(e)
            }
        }
    }

    /// Run forever. `on_step` sees every iteration; the loop pauses for
    /// `idle_ms` after iterations that produced no frame.
    pub fn run_with<D, F>(&mut self, delay: &mut D, idle_ms: u32, mut on_step: F) -> !
    where
        D: DelayMs<u32>,
        F: FnMut(&Step),
    {
        info!("Entering P1 loop (cooldown {} ms)...", self.cooldown_ms);
        loop {
            let step = self.step();
            on_step(&step);
            if step.frame.is_none() {
                delay.delay_ms(idle_ms);
            }
        }
    }
}
