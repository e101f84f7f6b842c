use super::fields::{FieldId, FieldSpec, FIELDS, FIELD_COUNT};
use core::fmt;

/// Fixed-point decimal stored as thousandths of its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedValue {
    pub milli: u32,
}

impl FixedValue {
    pub const fn from_milli(milli: u32) -> Self {
        Self { milli }
    }

    pub fn val(&self) -> f64 {
        self.milli as f64 / 1000.0
    }
}

impl fmt::Display for FixedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.milli / 1000, self.milli % 1000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedFixedValue {
    /// `YYMMDDhhmmssX`, X being `S` (summer) or `W` (winter)
    pub timestamp: String,
    pub value: FixedValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Fixed(FixedValue),
    Int(u32),
    Timestamped(TimestampedFixedValue),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Fixed(v) => Some(v.val()),
            FieldValue::Timestamped(v) => Some(v.value.val()),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Fixed(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Timestamped(v) => write!(f, "{} @ {}", v.value, v.timestamp),
        }
    }
}

/// One decoded telegram. A slot holding `Some` is a present field.
#[derive(Debug, Clone, PartialEq)]
pub struct TelegramRecord {
    values: [Option<FieldValue>; FIELD_COUNT],
}

impl Default for TelegramRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramRecord {
    pub fn new() -> Self {
        Self {
            values: core::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldValue> {
        self.values[id.index()].as_ref()
    }

    pub fn is_present(&self, id: FieldId) -> bool {
        self.values[id.index()].is_some()
    }

    /// Numeric value of a fixed, timestamped or integer field
    pub fn value(&self, id: FieldId) -> Option<f64> {
        self.get(id).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, id: FieldId) -> Option<&str> {
        self.get(id).and_then(FieldValue::as_str)
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Present fields in catalog order
    pub fn present(&self) -> impl Iterator<Item = (&'static FieldSpec, &FieldValue)> + '_ {
        FIELDS
            .iter()
            .zip(self.values.iter())
            .filter_map(|(spec, value)| value.as_ref().map(|v| (spec, v)))
    }

    /// Only the decoder fills a record; consumers get it read-only.
    pub(crate) fn set(&mut self, id: FieldId, value: FieldValue) {
        self.values[id.index()] = Some(value);
    }

    /// Dump every present field as `name: value unit`
    pub fn log_fields(&self) {
        for (spec, value) in self.present() {
            log::debug!("{}: {}{}", spec.name, value, spec.kind.unit());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_value() {
        let v = FixedValue::from_milli(1234);
        assert_eq!(v.val(), 1.234);
        assert_eq!(v.to_string(), "1.234");
        assert_eq!(FixedValue::from_milli(5).to_string(), "0.005");
    }

    #[test]
    fn test_new_record_has_nothing_present() {
        let record = TelegramRecord::new();
        assert_eq!(record.present_count(), 0);
        assert!(!record.is_present(FieldId::PowerDelivered));
        assert_eq!(record.value(FieldId::PowerDelivered), None);
    }

    #[test]
    fn test_present_iterates_in_catalog_order() {
        let mut record = TelegramRecord::new();
        record.set(FieldId::VoltageL1, FieldValue::Fixed(FixedValue::from_milli(230_100)));
        record.set(FieldId::P1Version, FieldValue::Text("50".into()));

        let names: Vec<_> = record.present().map(|(spec, _)| spec.name).collect();
        assert_eq!(names, ["p1_version", "voltage_l1"]);
        assert_eq!(record.text(FieldId::P1Version), Some("50"));
        assert_eq!(record.value(FieldId::VoltageL1), Some(230.1));
    }
}
