use super::fields::FieldSelection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P1Config {
    /// Baud rate of the P1 port (DSMR 4+ meters use 115200 8N1)
    pub baud_rate: u32,

    /// Minimum time between sample requests (ms)
    pub cooldown_ms: u64,

    /// Pause at the end of an idle loop iteration (ms)
    pub idle_delay_ms: u32,

    /// Fields to decode and publish
    pub fields: FieldSelection,
}

impl Default for P1Config {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            cooldown_ms: 10_000,
            idle_delay_ms: 10,
            fields: FieldSelection::all(),
        }
    }
}
