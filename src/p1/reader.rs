use embedded_hal::digital::v2::OutputPin;
use std::collections::VecDeque;

/// Largest telegram the reader will buffer
pub const FRAME_CAPACITY: usize = 4096;

/// Bytes pulled from the UART per read call
const READ_CHUNK: usize = 64;

/// Upper bound on reads per `poll`, so a chatty line cannot hold the loop
const MAX_READS_PER_POLL: usize = FRAME_CAPACITY / READ_CHUNK + 1;

/// Non-blocking byte source (the P1 UART)
pub trait SerialPort {
    type Error: core::fmt::Debug;

    /// Copy bytes that are already buffered into `buf`. Never waits; returns
    /// `Ok(0)` when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// A complete telegram from `/` up to and including the four checksum digits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    data: heapless::Vec<u8, FRAME_CAPACITY>,
}

impl RawFrame {
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        heapless::Vec::from_slice(data).ok().map(|data| Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No sample requested; incoming bytes are discarded
    Idle,
    /// Request line asserted, waiting for `/`
    WaitingForStart,
    /// Inside a telegram, waiting for `!`
    Reading,
    /// Collecting the four checksum digits
    Checksum { digits: u8 },
    /// A frame is ready to be taken
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub requests: u32,
    pub frames: u32,
    pub dropped: u32,
    pub read_errors: u32,
}

/// Anything the scheduler can sample telegrams from
pub trait TelegramSource {
    /// Assert the request line. Re-arming a pending request is a no-op;
    /// returns whether this call armed the reader.
    fn request_sample(&mut self) -> bool;
    /// Drain currently buffered bytes. Never blocks.
    fn poll(&mut self);
    fn frame_ready(&self) -> bool;
    /// Hand over the completed frame and go back to idle
    fn take_frame(&mut self) -> Option<RawFrame>;
}

/// Reads DSMR telegrams from a P1 port with an RTS-style request line.
///
/// Sampling is one-shot: each request yields at most one frame, after which
/// the request line is released until the next request.
pub struct TelegramReader<S, P> {
    serial: S,
    request_pin: P,
    state: ReaderState,
    buffer: RawFrame,
    /// Bytes read after a completed frame, replayed on the next poll
    carry: heapless::Vec<u8, READ_CHUNK>,
    stats: ReaderStats,
}

impl<S, P> TelegramReader<S, P>
where
    S: SerialPort,
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    pub fn new(serial: S, request_pin: P) -> Self {
        let mut reader = Self {
            serial,
            request_pin,
            state: ReaderState::Idle,
            buffer: RawFrame::default(),
            carry: heapless::Vec::new(),
            stats: ReaderStats::default(),
        };
        reader.set_request_line(false);
        reader
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn request_pin(&self) -> &P {
        &self.request_pin
    }

    pub fn request_sample(&mut self) -> bool {
        self.stats.requests += 1;
        if self.state != ReaderState::Idle {
            log::debug!("P1: sample already pending ({:?})", self.state);
            return false;
        }
        self.buffer.data.clear();
        self.set_request_line(true);
        self.state = ReaderState::WaitingForStart;
        true
    }

    pub fn poll(&mut self) {
        // Leave further bytes in the UART until the frame is taken
        if self.state == ReaderState::Complete {
            return;
        }
        if !self.carry.is_empty() {
            let carried = core::mem::take(&mut self.carry);
            self.consume(&carried);
        }

        let mut chunk = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_POLL {
            if self.state == ReaderState::Complete {
                return;
            }
            let n = match self.serial.read_available(&mut chunk) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    self.stats.read_errors += 1;
                    log::warn!("P1: serial read error: {:?}", e);
                    return;
                }
            };
            self.consume(&chunk[..n]);
        }
    }

    /// Bytes already pulled from the port but not yet fed to the framer
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// Feed `bytes` until a frame completes; keep whatever follows it
    fn consume(&mut self, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.feed(byte);
            if self.state == ReaderState::Complete {
                // `bytes` is at most one chunk long, so the rest always fits
                self.carry.clear();
                let _ = self.carry.extend_from_slice(&bytes[i + 1..]);
                return;
            }
        }
    }

    pub fn frame_ready(&self) -> bool {
        self.state == ReaderState::Complete
    }

    pub fn take_frame(&mut self) -> Option<RawFrame> {
        if self.state != ReaderState::Complete {
            return None;
        }
        self.state = ReaderState::Idle;
        Some(core::mem::take(&mut self.buffer))
    }

    pub fn release(self) -> (S, P) {
        (self.serial, self.request_pin)
    }

    fn feed(&mut self, byte: u8) {
        match self.state {
            ReaderState::Idle | ReaderState::Complete => {}
            ReaderState::WaitingForStart => {
                if byte == b'/' {
                    self.buffer.data.clear();
                    self.push(byte);
                    self.state = ReaderState::Reading;
                }
            }
            ReaderState::Reading => {
                if byte == b'/' {
                    self.drop_frame("unexpected start marker");
                } else if self.push(byte) && byte == b'!' {
                    self.state = ReaderState::Checksum { digits: 0 };
                }
            }
            ReaderState::Checksum { digits } => {
                if !byte.is_ascii_hexdigit() {
                    self.drop_frame("invalid checksum digit");
                } else if self.push(byte) {
                    if digits + 1 == 4 {
                        self.stats.frames += 1;
                        self.state = ReaderState::Complete;
                        self.set_request_line(false);
                        log::debug!("P1: telegram complete ({} bytes)", self.buffer.len());
                    } else {
                        self.state = ReaderState::Checksum { digits: digits + 1 };
                    }
                }
            }
        }
    }

    /// Returns false (and drops the frame) when the buffer is full
    fn push(&mut self, byte: u8) -> bool {
        if self.buffer.data.push(byte).is_err() {
            self.drop_frame("buffer overflow");
            return false;
        }
        true
    }

    fn drop_frame(&mut self, reason: &str) {
        log::debug!("P1: dropping partial telegram: {}", reason);
        self.stats.dropped += 1;
        self.buffer.data.clear();
        self.state = ReaderState::Idle;
        self.set_request_line(false);
    }

    fn set_request_line(&mut self, high: bool) {
        let result = if high {
            self.request_pin.set_high()
        } else {
            self.request_pin.set_low()
        };
        if let Err(e) = result {
            log::warn!("P1: failed to drive request line: {:?}", e);
        }
    }
}

impl<S, P> TelegramSource for TelegramReader<S, P>
where
    S: SerialPort,
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    fn request_sample(&mut self) -> bool {
        TelegramReader::request_sample(self)
    }

    fn poll(&mut self) {
        TelegramReader::poll(self)
    }

    fn frame_ready(&self) -> bool {
        TelegramReader::frame_ready(self)
    }

    fn take_frame(&mut self) -> Option<RawFrame> {
        TelegramReader::take_frame(self)
    }
}

/// In-memory serial port, fed by the caller. Used to replay captures.
#[derive(Debug, Default)]
pub struct MemorySerial {
    pending: VecDeque<u8>,
    reads: usize,
}

impl MemorySerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend(data);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of `read_available` calls so far
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl SerialPort for MemorySerial {
    type Error = core::convert::Infallible;

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.reads += 1;
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Request line that is not wired to anything
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconnectedPin {
    pub high: bool,
    pub rising_edges: u32,
}

impl OutputPin for UnconnectedPin {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.high {
            self.rising_edges += 1;
        }
        self.high = true;
        Ok(())
    }
}
