//! Telegram decoder.
//!
//! A telegram looks like
//!
//! ```text
//! /KFM5KAIFA-METER
//!
//! 1-3:0.2.8(42)
//! 1-0:1.7.0(00.333*kW)
//! 0-1:24.2.1(150117180000W)(00473.789*m3)
//! !6F4A
//! ```
//!
//! The checksum is verified before any line is looked at. Within a verified
//! telegram, lines with an unknown OBIS code (or no OBIS code at all) are
//! skipped, but a known field with a malformed value rejects the whole telegram.

use super::crc::{crc16, parse_checksum};
use super::error::{DecodeError, DecodeResult, FieldError};
use super::fields::{self, FieldId, FieldKind, FieldSelection, Obis, HEADER_MAX_LEN};
use super::reader::RawFrame;
use super::record::{FieldValue, FixedValue, TelegramRecord, TimestampedFixedValue};

const TIMESTAMP_LEN: usize = 13;

#[derive(Debug, Clone, Default)]
pub struct TelegramDecoder {
    selection: FieldSelection,
}

impl TelegramDecoder {
    pub fn new(selection: FieldSelection) -> Self {
        Self { selection }
    }

    pub fn selection(&self) -> FieldSelection {
        self.selection
    }

    /// Consume a frame handed over by the reader
    pub fn decode(&self, frame: RawFrame) -> DecodeResult<TelegramRecord> {
        self.decode_bytes(frame.as_bytes())
    }

    pub fn decode_bytes(&self, data: &[u8]) -> DecodeResult<TelegramRecord> {
        if data.first() != Some(&b'/') {
            return Err(DecodeError::MissingStartMarker);
        }
        let bang = data
            .iter()
            .position(|&b| b == b'!')
            .ok_or(DecodeError::MissingEndMarker)?;

        let tail = &data[bang + 1..];
        if tail.len() < 4 || !tail[4..].iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::InvalidChecksumField);
        }
        let expected = parse_checksum(&tail[..4]).ok_or(DecodeError::InvalidChecksumField)?;
        let computed = crc16(&data[..=bang]);
        if expected != computed {
            return Err(DecodeError::ChecksumMismatch { expected, computed });
        }

        let body = &data[1..bang];
        if !body.is_ascii() {
            return Err(DecodeError::NotAscii);
        }
        // ASCII is always valid UTF-8
        let text = core::str::from_utf8(body).map_err(|_| DecodeError::NotAscii)?;
        let record = self.parse_lines(text)?;
        log::debug!("P1: decoded telegram with {} fields", record.present_count());
        Ok(record)
    }

    fn parse_lines(&self, text: &str) -> DecodeResult<TelegramRecord> {
        let mut record = TelegramRecord::new();

        let (header, body) = text.split_once('\n').unwrap_or((text, ""));
        if !header.trim().is_empty() && self.selection.contains(FieldId::Identification) {
            let spec = &fields::FIELDS[FieldId::Identification.index()];
            let value = parse_value(spec.kind, header)
                .map_err(|e| DecodeError::field(spec.name, 1, e))?;
            record.set(FieldId::Identification, value);
        }

        // Header is line 1
        for (line_no, line) in logical_lines(body, 2) {
            let Some(open) = line.find('(') else {
                continue;
            };
            let Some(obis) = Obis::parse(line[..open].trim()) else {
                log::debug!("P1: line {}: skipping unrecognized line", line_no);
                continue;
            };
            let Some(spec) = fields::lookup(&obis) else {
                log::debug!("P1: line {}: skipping unknown OBIS {}", line_no, obis);
                continue;
            };
            if !self.selection.contains(spec.id) {
                continue;
            }
            if record.is_present(spec.id) {
                return Err(DecodeError::DuplicateField {
                    field: spec.name,
                    line: line_no,
                });
            }

            let value = parse_value(spec.kind, &line[open..])
                .map_err(|e| DecodeError::field(spec.name, line_no, e))?;
            record.set(spec.id, value);
        }

        Ok(record)
    }
}

/// Join physical lines into logical ones. A line starting with `(` continues
/// the previous line. Yields the number of the first physical line.
fn logical_lines(body: &str, first_line_no: usize) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (offset, raw) in body.split('\n').enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match lines.last_mut() {
            Some((_, prev)) if line.starts_with('(') => prev.push_str(line),
            _ => lines.push((first_line_no + offset, line.to_string())),
        }
    }
    lines
}

fn parse_value(kind: FieldKind, rest: &str) -> Result<FieldValue, FieldError> {
    match kind {
        FieldKind::Header => {
            let s = rest.trim();
            check_len(s, 0, HEADER_MAX_LEN)?;
            printable(s)?;
            Ok(FieldValue::Text(s.to_string()))
        }
        FieldKind::Raw => {
            let s = rest.trim_end();
            printable(s)?;
            Ok(FieldValue::Text(s.to_string()))
        }
        FieldKind::Text { min, max } => {
            let (s, rest) = group(rest)?;
            expect_end(rest)?;
            check_len(s, min, max)?;
            printable(s)?;
            Ok(FieldValue::Text(s.to_string()))
        }
        FieldKind::Fixed { unit, int_unit } => {
            let (s, rest) = group(rest)?;
            expect_end(rest)?;
            Ok(FieldValue::Fixed(parse_fixed(s, unit, int_unit)?))
        }
        FieldKind::Int { max, unit } => {
            let (s, rest) = group(rest)?;
            expect_end(rest)?;
            let value = parse_number(s, 0, unit.unwrap_or(""))?;
            if value > max as u64 {
                return Err(FieldError::OutOfRange { value, max });
            }
            Ok(FieldValue::Int(value as u32))
        }
        FieldKind::TimestampedFixed { unit, int_unit } => {
            let (timestamp, rest) = group(rest)?;
            let (s, rest) = group(rest)?;
            expect_end(rest)?;
            check_len(timestamp, TIMESTAMP_LEN, TIMESTAMP_LEN)?;
            Ok(FieldValue::Timestamped(TimestampedFixedValue {
                timestamp: timestamp.to_string(),
                value: parse_fixed(s, unit, int_unit)?,
            }))
        }
    }
}

/// Split `(value)rest` into `value` and `rest`
fn group(s: &str) -> Result<(&str, &str), FieldError> {
    let inner = s.strip_prefix('(').ok_or(FieldError::MissingValue)?;
    let close = inner.find(')').ok_or(FieldError::Unterminated)?;
    Ok((&inner[..close], &inner[close + 1..]))
}

fn expect_end(rest: &str) -> Result<(), FieldError> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(FieldError::TrailingData)
    }
}

fn check_len(s: &str, min: usize, max: usize) -> Result<(), FieldError> {
    if (min..=max).contains(&s.len()) {
        Ok(())
    } else {
        Err(FieldError::StringLength {
            len: s.len(),
            min,
            max,
        })
    }
}

/// Text values must be printable ASCII, which keeps their JSON form at most
/// twice as long
fn printable(s: &str) -> Result<(), FieldError> {
    if s.bytes().all(|b| (b' '..=b'~').contains(&b)) {
        Ok(())
    } else {
        Err(FieldError::NotPrintable)
    }
}

/// `123.456*kWh` with the primary unit, or `123456*Wh` with the integer unit
fn parse_fixed(s: &str, unit: &'static str, int_unit: &'static str) -> Result<FixedValue, FieldError> {
    let milli = match parse_number(s, 3, unit) {
        Ok(v) => v,
        Err(FieldError::InvalidUnit { .. }) => parse_number(s, 0, int_unit).map_err(|e| match e {
            FieldError::InvalidUnit { .. } => FieldError::InvalidUnit { expected: unit },
            other => other,
        })?,
        Err(e) => return Err(e),
    };
    let milli = u32::try_from(milli).map_err(|_| FieldError::OutOfRange {
        value: milli,
        max: u32::MAX,
    })?;
    Ok(FixedValue::from_milli(milli))
}

/// Parse `digits[.decimals][*unit]`, scaled by `10^max_decimals`.
/// An empty `unit` means the value must not carry one.
fn parse_number(s: &str, max_decimals: u32, unit: &'static str) -> Result<u64, FieldError> {
    let (number, found_unit) = match s.split_once('*') {
        Some((n, u)) => (n, Some(u)),
        None => (s, None),
    };
    match found_unit {
        None if unit.is_empty() => {}
        Some(u) if !unit.is_empty() && u.eq_ignore_ascii_case(unit) => {}
        _ => return Err(FieldError::InvalidUnit { expected: unit }),
    }

    let (int_part, decimals) = match number.split_once('.') {
        Some((_, "")) => return Err(FieldError::InvalidNumber),
        Some((i, d)) => (i, d),
        None => (number, ""),
    };
    if int_part.is_empty() || !is_digits(int_part) || !is_digits(decimals) {
        return Err(FieldError::InvalidNumber);
    }
    if decimals.len() > max_decimals as usize {
        return Err(FieldError::TooManyDecimals);
    }

    let scale = 10u64.pow(max_decimals);
    let whole: u64 = int_part.parse().map_err(|_| FieldError::InvalidNumber)?;
    let mut fraction: u64 = if decimals.is_empty() {
        0
    } else {
        decimals.parse().map_err(|_| FieldError::InvalidNumber)?
    };
    for _ in decimals.len()..max_decimals as usize {
        fraction *= 10;
    }
    whole
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction))
        .ok_or(FieldError::InvalidNumber)
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}
