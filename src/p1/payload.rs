use super::fields::{payload_capacity, FieldSpec};
use super::record::{FieldValue, TelegramRecord};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Serialized JSON snapshot of the present fields of one telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // serde_json only ever writes UTF-8
        core::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Projects records into flat JSON documents keyed by field name.
///
/// Absent fields never appear. Fixed-point values are written as numbers,
/// counters as integers and text as strings.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    capacity: usize,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self {
            capacity: payload_capacity(),
        }
    }

    /// Bytes reserved up front for every document
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn build(&self, record: &TelegramRecord) -> Payload {
        let mut out = Vec::with_capacity(self.capacity);
        // Writing into a Vec cannot fail and every value is serializable
        if let Err(e) = serde_json::to_writer(&mut out, &Document(record)) {
            log::warn!("Payload: serialization failed: {}", e);
            out.clear();
            out.extend_from_slice(b"{}");
        }
        Payload(out)
    }
}

struct Document<'a>(&'a TelegramRecord);

struct Value<'a>(&'a FieldSpec, &'a FieldValue);

impl Serialize for Document<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.present_count()))?;
        for (spec, value) in self.0.present() {
            map.serialize_entry(spec.name, &Value(spec, value))?;
        }
        map.end()
    }
}

impl Serialize for Value<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.1 {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Int(v) => serializer.serialize_u32(*v),
            FieldValue::Fixed(v) => serializer.serialize_f64(v.val()),
            FieldValue::Timestamped(v) => serializer.serialize_f64(v.value.val()),
        }
    }
}
