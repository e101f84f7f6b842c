//! Static catalog of every DSMR field the reader understands.
//!
//! Each field is described once in [`FIELDS`]: its JSON name, the OBIS code that
//! identifies it on a data line, and how its value is encoded. The decoder and the
//! payload builder both walk this table instead of having per-field code paths.

use core::fmt;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// M-Bus channel numbers used by the meter for attached devices
pub const GAS_MBUS_ID: u8 = 1;
pub const THERMAL_MBUS_ID: u8 = 2;
pub const WATER_MBUS_ID: u8 = 3;
pub const SLAVE_MBUS_ID: u8 = 4;

/// Longest meter identification accepted on the header line
pub const HEADER_MAX_LEN: usize = 96;

/// OBIS identifier, e.g. `1-0:1.8.1`. Missing trailing groups are 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Obis(pub [u8; 6]);

impl Obis {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8) -> Self {
        Self([a, b, c, d, e, 255])
    }

    /// Parse the textual id preceding the first `(` of a data line.
    pub fn parse(s: &str) -> Option<Self> {
        let mut groups = [255u8; 6];
        let mut count = 0;
        for part in s.split(['-', ':', '.', '*']) {
            if count == groups.len() || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            groups[count] = part.parse().ok()?;
            count += 1;
        }
        // A bare number is not an OBIS id
        if count < 2 {
            return None;
        }
        Some(Self(groups))
    }
}

impl fmt::Display for Obis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, _] = self.0;
        write!(f, "{}-{}:{}.{}.{}", a, b, c, d, e)
    }
}

/// How a field's value is written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The text after `/` on the first line of the telegram
    Header,
    /// `(text)` with length bounds
    Text { min: usize, max: usize },
    /// Everything after the OBIS id, kept verbatim
    Raw,
    /// `(123.456*kWh)` or `(123456*Wh)`
    Fixed {
        unit: &'static str,
        int_unit: &'static str,
    },
    /// `(00004)` or `(004*A)`
    Int {
        max: u32,
        unit: Option<&'static str>,
    },
    /// `(YYMMDDhhmmssX)(00473.789*m3)`
    TimestampedFixed {
        unit: &'static str,
        int_unit: &'static str,
    },
}

impl FieldKind {
    /// Widest JSON rendering of a value of this kind.
    ///
    /// Text values are printable ASCII, so escaping (`\"` and `\\`) at most
    /// doubles them.
    pub const fn max_json_width(&self) -> usize {
        match *self {
            FieldKind::Header => 2 * HEADER_MAX_LEN + 2,
            FieldKind::Text { max, .. } => 2 * max + 2,
            FieldKind::Raw => 2 * super::reader::FRAME_CAPACITY + 2,
            // u32 thousandths rendered as a float
            FieldKind::Fixed { .. } | FieldKind::TimestampedFixed { .. } => 14,
            FieldKind::Int { .. } => 10,
        }
    }

    /// Rendered as a JSON string
    pub const fn is_text(&self) -> bool {
        matches!(
            self,
            FieldKind::Header | FieldKind::Text { .. } | FieldKind::Raw
        )
    }

    pub const fn unit(&self) -> &'static str {
        match *self {
            FieldKind::Fixed { unit, .. } | FieldKind::TimestampedFixed { unit, .. } => unit,
            FieldKind::Int {
                unit: Some(unit), ..
            } => unit,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Identification,
    P1Version,
    Timestamp,
    EquipmentId,
    EnergyDeliveredTariff1,
    EnergyDeliveredTariff2,
    EnergyReturnedTariff1,
    EnergyReturnedTariff2,
    ElectricityTariff,
    PowerDelivered,
    PowerReturned,
    ElectricityThreshold,
    ElectricitySwitchPosition,
    ElectricityFailures,
    ElectricityLongFailures,
    ElectricityFailureLog,
    ElectricitySagsL1,
    ElectricitySagsL2,
    ElectricitySagsL3,
    ElectricitySwellsL1,
    ElectricitySwellsL2,
    ElectricitySwellsL3,
    MessageShort,
    MessageLong,
    VoltageL1,
    VoltageL2,
    VoltageL3,
    CurrentL1,
    CurrentL2,
    CurrentL3,
    PowerDeliveredL1,
    PowerDeliveredL2,
    PowerDeliveredL3,
    PowerReturnedL1,
    PowerReturnedL2,
    PowerReturnedL3,
    GasDeviceType,
    GasEquipmentId,
    GasValvePosition,
    GasDelivered,
    ThermalDeviceType,
    ThermalEquipmentId,
    ThermalValvePosition,
    ThermalDelivered,
    WaterDeviceType,
    WaterEquipmentId,
    WaterValvePosition,
    WaterDelivered,
    SlaveDeviceType,
    SlaveEquipmentId,
    SlaveValvePosition,
    SlaveDelivered,
}

impl FieldId {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn spec(self) -> &'static FieldSpec {
        &FIELDS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FIELDS.iter().find(|f| f.name == name).map(|f| f.id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub id: FieldId,
    pub name: &'static str,
    /// `None` for the header line, which has no OBIS code
    pub obis: Option<Obis>,
    pub kind: FieldKind,
}

pub const FIELD_COUNT: usize = 52;

const U8_MAX: u32 = u8::MAX as u32;
const U16_MAX: u32 = u16::MAX as u32;

const fn field(id: FieldId, name: &'static str, obis: Obis, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        id,
        name,
        obis: Some(obis),
        kind,
    }
}

const fn text(min: usize, max: usize) -> FieldKind {
    FieldKind::Text { min, max }
}

const fn fixed(unit: &'static str, int_unit: &'static str) -> FieldKind {
    FieldKind::Fixed { unit, int_unit }
}

const fn int(max: u32, unit: Option<&'static str>) -> FieldKind {
    FieldKind::Int { max, unit }
}

const fn timestamped(unit: &'static str, int_unit: &'static str) -> FieldKind {
    FieldKind::TimestampedFixed { unit, int_unit }
}

const KWH: FieldKind = fixed("kWh", "Wh");
const KW: FieldKind = fixed("kW", "W");
const VOLT: FieldKind = fixed("V", "mV");
const AMPERE: FieldKind = int(U16_MAX, Some("A"));
const COUNTER: FieldKind = int(u32::MAX, None);
const DEVICE_TYPE: FieldKind = int(U16_MAX, None);
const POSITION: FieldKind = int(U8_MAX, None);
const EQUIPMENT_ID: FieldKind = text(0, 96);

/// The full catalog, indexed by [`FieldId`]
pub static FIELDS: [FieldSpec; FIELD_COUNT] = {
    use FieldId::*;
    [
        FieldSpec {
            id: Identification,
            name: "identification",
            obis: None,
            kind: FieldKind::Header,
        },
        field(P1Version, "p1_version", Obis::new(1, 3, 0, 2, 8), text(2, 2)),
        field(Timestamp, "timestamp", Obis::new(0, 0, 1, 0, 0), text(13, 13)),
        field(EquipmentId, "equipment_id", Obis::new(0, 0, 96, 1, 1), EQUIPMENT_ID),
        field(EnergyDeliveredTariff1, "energy_delivered_tariff1", Obis::new(1, 0, 1, 8, 1), KWH),
        field(EnergyDeliveredTariff2, "energy_delivered_tariff2", Obis::new(1, 0, 1, 8, 2), KWH),
        field(EnergyReturnedTariff1, "energy_returned_tariff1", Obis::new(1, 0, 2, 8, 1), KWH),
        field(EnergyReturnedTariff2, "energy_returned_tariff2", Obis::new(1, 0, 2, 8, 2), KWH),
        field(ElectricityTariff, "electricity_tariff", Obis::new(0, 0, 96, 14, 0), text(4, 4)),
        field(PowerDelivered, "power_delivered", Obis::new(1, 0, 1, 7, 0), KW),
        field(PowerReturned, "power_returned", Obis::new(1, 0, 2, 7, 0), KW),
        field(ElectricityThreshold, "electricity_threshold", Obis::new(0, 0, 17, 0, 0), KW),
        field(ElectricitySwitchPosition, "electricity_switch_position", Obis::new(0, 0, 96, 3, 10), POSITION),
        field(ElectricityFailures, "electricity_failures", Obis::new(0, 0, 96, 7, 21), COUNTER),
        field(ElectricityLongFailures, "electricity_long_failures", Obis::new(0, 0, 96, 7, 9), COUNTER),
        field(ElectricityFailureLog, "electricity_failure_log", Obis::new(1, 0, 99, 97, 0), FieldKind::Raw),
        field(ElectricitySagsL1, "electricity_sags_l1", Obis::new(1, 0, 32, 32, 0), COUNTER),
        field(ElectricitySagsL2, "electricity_sags_l2", Obis::new(1, 0, 52, 32, 0), COUNTER),
        field(ElectricitySagsL3, "electricity_sags_l3", Obis::new(1, 0, 72, 32, 0), COUNTER),
        field(ElectricitySwellsL1, "electricity_swells_l1", Obis::new(1, 0, 32, 36, 0), COUNTER),
        field(ElectricitySwellsL2, "electricity_swells_l2", Obis::new(1, 0, 52, 36, 0), COUNTER),
        field(ElectricitySwellsL3, "electricity_swells_l3", Obis::new(1, 0, 72, 36, 0), COUNTER),
        field(MessageShort, "message_short", Obis::new(0, 0, 96, 13, 1), text(0, 16)),
        field(MessageLong, "message_long", Obis::new(0, 0, 96, 13, 0), text(0, 2048)),
        field(VoltageL1, "voltage_l1", Obis::new(1, 0, 32, 7, 0), VOLT),
        field(VoltageL2, "voltage_l2", Obis::new(1, 0, 52, 7, 0), VOLT),
        field(VoltageL3, "voltage_l3", Obis::new(1, 0, 72, 7, 0), VOLT),
        field(CurrentL1, "current_l1", Obis::new(1, 0, 31, 7, 0), AMPERE),
        field(CurrentL2, "current_l2", Obis::new(1, 0, 51, 7, 0), AMPERE),
        field(CurrentL3, "current_l3", Obis::new(1, 0, 71, 7, 0), AMPERE),
        field(PowerDeliveredL1, "power_delivered_l1", Obis::new(1, 0, 21, 7, 0), KW),
        field(PowerDeliveredL2, "power_delivered_l2", Obis::new(1, 0, 41, 7, 0), KW),
        field(PowerDeliveredL3, "power_delivered_l3", Obis::new(1, 0, 61, 7, 0), KW),
        field(PowerReturnedL1, "power_returned_l1", Obis::new(1, 0, 22, 7, 0), KW),
        field(PowerReturnedL2, "power_returned_l2", Obis::new(1, 0, 42, 7, 0), KW),
        field(PowerReturnedL3, "power_returned_l3", Obis::new(1, 0, 62, 7, 0), KW),
        field(GasDeviceType, "gas_device_type", Obis::new(0, GAS_MBUS_ID, 24, 1, 0), DEVICE_TYPE),
        field(GasEquipmentId, "gas_equipment_id", Obis::new(0, GAS_MBUS_ID, 96, 1, 0), EQUIPMENT_ID),
        field(GasValvePosition, "gas_valve_position", Obis::new(0, GAS_MBUS_ID, 24, 4, 0), POSITION),
        field(GasDelivered, "gas_delivered", Obis::new(0, GAS_MBUS_ID, 24, 2, 1), timestamped("m3", "dm3")),
        field(ThermalDeviceType, "thermal_device_type", Obis::new(0, THERMAL_MBUS_ID, 24, 1, 0), DEVICE_TYPE),
        field(ThermalEquipmentId, "thermal_equipment_id", Obis::new(0, THERMAL_MBUS_ID, 96, 1, 0), EQUIPMENT_ID),
        field(ThermalValvePosition, "thermal_valve_position", Obis::new(0, THERMAL_MBUS_ID, 24, 4, 0), POSITION),
        field(ThermalDelivered, "thermal_delivered", Obis::new(0, THERMAL_MBUS_ID, 24, 2, 1), timestamped("GJ", "MJ")),
        field(WaterDeviceType, "water_device_type", Obis::new(0, WATER_MBUS_ID, 24, 1, 0), DEVICE_TYPE),
        field(WaterEquipmentId, "water_equipment_id", Obis::new(0, WATER_MBUS_ID, 96, 1, 0), EQUIPMENT_ID),
        field(WaterValvePosition, "water_valve_position", Obis::new(0, WATER_MBUS_ID, 24, 4, 0), POSITION),
        field(WaterDelivered, "water_delivered", Obis::new(0, WATER_MBUS_ID, 24, 2, 1), timestamped("m3", "dm3")),
        field(SlaveDeviceType, "slave_device_type", Obis::new(0, SLAVE_MBUS_ID, 24, 1, 0), DEVICE_TYPE),
        field(SlaveEquipmentId, "slave_equipment_id", Obis::new(0, SLAVE_MBUS_ID, 96, 1, 0), EQUIPMENT_ID),
        field(SlaveValvePosition, "slave_valve_position", Obis::new(0, SLAVE_MBUS_ID, 24, 4, 0), POSITION),
        field(SlaveDelivered, "slave_delivered", Obis::new(0, SLAVE_MBUS_ID, 24, 2, 1), timestamped("m3", "dm3")),
    ]
};

/// Look up the field carried on a data line with the given OBIS code.
pub fn lookup(obis: &Obis) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.obis.as_ref() == Some(obis))
}

/// Worst-case size of a JSON document holding every field of the catalog.
/// Depends only on the catalog, never on a particular telegram.
pub fn payload_capacity() -> usize {
    // `{}` plus `"name":` and `,` per field
    let keys: usize = FIELDS.iter().map(|f| f.name.len() + 4).sum();
    let numbers: usize = FIELDS
        .iter()
        .filter(|f| !f.kind.is_text())
        .map(|f| f.kind.max_json_width())
        .sum();
    let text_fields = FIELDS.iter().filter(|f| f.kind.is_text()).count();
    let text_widths: usize = FIELDS
        .iter()
        .filter(|f| f.kind.is_text())
        .map(|f| f.kind.max_json_width())
        .sum();
    // Every text value is cut from the same frame, so together they never
    // hold more than a frame's worth of characters
    let text = text_widths.min(2 * super::reader::FRAME_CAPACITY + 2 * text_fields);
    2 + keys + numbers + text
}

/// Subset of the catalog a deployment is interested in.
///
/// Serialized as a list of field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSelection(u64);

impl FieldSelection {
    pub const fn all() -> Self {
        Self((1u64 << FIELD_COUNT) - 1)
    }

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn with(self, id: FieldId) -> Self {
        Self(self.0 | (1u64 << id.index()))
    }

    pub const fn without(self, id: FieldId) -> Self {
        Self(self.0 & !(1u64 << id.index()))
    }

    pub const fn contains(&self, id: FieldId) -> bool {
        self.0 & (1u64 << id.index()) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldId> + '_ {
        FIELDS.iter().map(|f| f.id).filter(move |id| self.contains(*id))
    }
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<FieldId> for FieldSelection {
    fn from_iter<I: IntoIterator<Item = FieldId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

impl Serialize for FieldSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for id in self.iter() {
            seq.serialize_element(id.name())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for FieldSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SelectionVisitor;

        impl<'de> Visitor<'de> for SelectionVisitor {
            type Value = FieldSelection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of telegram field names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut selection = FieldSelection::none();
                while let Some(name) = seq.next_element::<String>()? {
                    let id = FieldId::from_name(&name)
                        .ok_or_else(|| de::Error::custom(format!("unknown field '{}'", name)))?;
                    selection = selection.with(id);
                }
                Ok(selection)
            }
        }

        deserializer.deserialize_seq(SelectionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_field_id() {
        for (i, spec) in FIELDS.iter().enumerate() {
            assert_eq!(spec.id.index(), i, "{} is out of place", spec.name);
        }
    }

    #[test]
    fn test_names_and_obis_codes_are_unique() {
        for (i, a) in FIELDS.iter().enumerate() {
            for b in &FIELDS[i + 1..] {
                assert_ne!(a.name, b.name);
                if a.obis.is_some() {
                    assert_ne!(a.obis, b.obis, "{} and {}", a.name, b.name);
                }
            }
        }
    }

    #[test]
    fn test_obis_parse() {
        assert_eq!(Obis::parse("1-0:1.8.1"), Some(Obis::new(1, 0, 1, 8, 1)));
        assert_eq!(Obis::parse("0-1:24.2.1"), Some(Obis::new(0, 1, 24, 2, 1)));
        assert_eq!(Obis::parse("1-0:1.8.1*255"), Some(Obis([1, 0, 1, 8, 1, 255])));
        assert_eq!(Obis::parse("1-0:1.8.1.2.3.4"), None);
        assert_eq!(Obis::parse("1-0::1"), None);
        assert_eq!(Obis::parse("12"), None);
        assert_eq!(Obis::parse("garbage"), None);
        assert_eq!(Obis::parse("1-0:1.8.300"), None);
    }

    #[test]
    fn test_lookup() {
        let spec = lookup(&Obis::new(1, 0, 1, 7, 0)).expect("power_delivered");
        assert_eq!(spec.id, FieldId::PowerDelivered);
        assert!(lookup(&Obis::new(9, 9, 9, 9, 9)).is_none());
    }

    #[test]
    fn test_selection() {
        let sel = FieldSelection::none()
            .with(FieldId::PowerDelivered)
            .with(FieldId::GasDelivered);
        assert!(sel.contains(FieldId::PowerDelivered));
        assert!(!sel.contains(FieldId::PowerReturned));
        assert_eq!(sel.len(), 2);
        assert_eq!(FieldSelection::all().len(), FIELD_COUNT);
        assert!(!FieldSelection::all()
            .without(FieldId::Timestamp)
            .contains(FieldId::Timestamp));
    }

    #[test]
    fn test_selection_serde_uses_names() {
        let sel: FieldSelection =
            serde_json::from_str(r#"["power_delivered","voltage_l1"]"#).unwrap();
        assert_eq!(
            sel,
            [FieldId::PowerDelivered, FieldId::VoltageL1]
                .into_iter()
                .collect()
        );
        assert_eq!(
            serde_json::to_string(&sel).unwrap(),
            r#"["power_delivered","voltage_l1"]"#
        );
        assert!(serde_json::from_str::<FieldSelection>(r#"["nope"]"#).is_err());
    }

    #[test]
    fn test_text_width_counts_escapes() {
        assert_eq!(text(0, 16).max_json_width(), 34);
        assert_eq!(FieldKind::Header.max_json_width(), 2 * HEADER_MAX_LEN + 2);
        assert!(FieldKind::Raw.is_text());
        assert!(!KWH.is_text());
    }

    #[test]
    fn test_message_long_fits_longest_message() {
        let spec = &FIELDS[FieldId::MessageLong.index()];
        assert_eq!(spec.kind, text(0, 2048));
        assert!(spec.kind.max_json_width() < 2 * crate::p1::reader::FRAME_CAPACITY);
    }

    #[test]
    fn test_payload_capacity_covers_catalog() {
        let names: usize = FIELDS.iter().map(|f| f.name.len()).sum();
        assert!(payload_capacity() > names);
    }
}
